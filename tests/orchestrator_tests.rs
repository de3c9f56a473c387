//! Orchestrator behavior against an in-process fake runtime.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use mailpool::config::Config;
use mailpool::error::{PoolError, Result};
use mailpool::model::container::{
    ContainerHandle, ContainerStatus, ExecOutput, LogFilter, UserSelector,
};
use mailpool::model::delivery::{DeliveryRecord, DeliveryStatus};
use mailpool::model::outcome::{tally, UnitOutcome};
use mailpool::orchestrator::ContainerOrchestrator;
use mailpool::runtime::ContainerRuntime;
use mailpool::store::LogStore;
use serde_json::json;

const PLAIN: &[u8] = include_bytes!("fixtures/plain.eml");
const MULTIPART: &[u8] = include_bytes!("fixtures/multipart.eml");

#[derive(Default)]
struct FakeContainer {
    handle: Option<ContainerHandle>,
    /// Mailbox files keyed by directory, then file name.
    files: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    logs: String,
    stats: serde_json::Value,
}

/// Single-node runtime kept entirely in memory.
#[derive(Default)]
struct FakeRuntime {
    containers: RefCell<HashMap<String, FakeContainer>>,
    execs: RefCell<Vec<(String, Vec<String>)>>,
    next_id: RefCell<u32>,
}

impl FakeRuntime {
    fn add(&self, id: &str, status: ContainerStatus) {
        let started_at = (status == ContainerStatus::Running).then(|| "2024-01-01T10:00:00.123Z".into());
        self.containers.borrow_mut().insert(
            id.to_string(),
            FakeContainer {
                handle: Some(ContainerHandle {
                    id: id.to_string(),
                    name: format!("mail-{id}"),
                    status,
                    started_at,
                }),
                ..FakeContainer::default()
            },
        );
    }

    fn put_mail(&self, id: &str, dir: &str, file: &str, raw: &[u8]) {
        self.containers
            .borrow_mut()
            .get_mut(id)
            .unwrap()
            .files
            .entry(dir.to_string())
            .or_default()
            .insert(file.to_string(), raw.to_vec());
    }

    fn with<T>(&self, id: &str, f: impl FnOnce(&mut FakeContainer) -> T) -> Result<T> {
        let mut containers = self.containers.borrow_mut();
        let found = containers
            .values_mut()
            .find(|c| c.handle.as_ref().is_some_and(|h| h.id == id || h.name == id));
        match found {
            Some(c) => Ok(f(c)),
            None => Err(PoolError::NotFound(format!("container '{id}'"))),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn create(&self, image: &str, _smtp_port: u16) -> Result<ContainerHandle> {
        if image.is_empty() {
            return Err(PoolError::Runtime("no image".into()));
        }
        let mut next = self.next_id.borrow_mut();
        *next += 1;
        let id = format!("new{next}");
        drop(next);
        self.add(&id, ContainerStatus::Running);
        self.get(&id)
    }

    fn get(&self, id: &str) -> Result<ContainerHandle> {
        self.with(id, |c| c.handle.clone())?
            .ok_or_else(|| PoolError::NotFound(id.to_string()))
    }

    fn list(&self, all: bool) -> Result<Vec<ContainerHandle>> {
        let mut handles: Vec<_> = self
            .containers
            .borrow()
            .values()
            .filter_map(|c| c.handle.clone())
            .filter(|h| all || h.is_running())
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(handles)
    }

    fn remove(&self, id: &str, _force: bool) -> Result<()> {
        let real = self.get(id)?.id;
        self.containers.borrow_mut().remove(&real);
        Ok(())
    }

    fn start(&self, id: &str) -> Result<()> {
        self.with(id, |c| {
            if let Some(h) = c.handle.as_mut() {
                h.status = ContainerStatus::Running;
                h.started_at = Some("2024-01-01T10:00:00Z".into());
            }
        })
    }

    fn exec(&self, id: &str, command: &[&str]) -> Result<ExecOutput> {
        self.execs.borrow_mut().push((
            id.to_string(),
            command.iter().map(|s| s.to_string()).collect(),
        ));
        self.with(id, |c| match command {
            ["ls", dir] => match c.files.get(*dir) {
                Some(files) => ExecOutput {
                    exit_code: 0,
                    output: files.keys().map(|f| format!("{f}\n")).collect::<String>().into_bytes(),
                },
                None => ExecOutput {
                    exit_code: 2,
                    output: b"ls: cannot access: No such file or directory\n".to_vec(),
                },
            },
            ["cat", path] => {
                let (dir, file) = path.rsplit_once('/').unwrap();
                match c.files.get(dir).and_then(|f| f.get(file)) {
                    Some(raw) => ExecOutput {
                        exit_code: 0,
                        output: raw.clone(),
                    },
                    None => ExecOutput {
                        exit_code: 1,
                        output: Vec::new(),
                    },
                }
            }
            ["sh", "-c", script] if script.contains("user2") => ExecOutput {
                exit_code: 1,
                output: b"useradd: cannot lock /etc/passwd\n".to_vec(),
            },
            ["false", ..] => ExecOutput {
                exit_code: 1,
                output: b"smtp connect failed\n".to_vec(),
            },
            _ => ExecOutput {
                exit_code: 0,
                output: b"done\n".to_vec(),
            },
        })
    }

    fn stats(&self, id: &str) -> Result<serde_json::Value> {
        self.with(id, |c| c.stats.clone())
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String> {
        self.with(id, |c| {
            let lines: Vec<&str> = c.logs.lines().collect();
            lines[lines.len().saturating_sub(tail)..].join("\n")
        })
    }
}

fn config(user_count: u32) -> Config {
    let mut cfg = Config::default();
    cfg.mailbox.user_count = user_count;
    cfg
}

fn sent(container: &str, recipient: &str, ts: f64) -> DeliveryRecord {
    DeliveryRecord {
        container_id: container.to_string(),
        recipient: recipient.to_string(),
        subject: "Automated Test 1000".to_string(),
        status: DeliveryStatus::Success,
        timestamp: ts,
        body_snippet: String::new(),
        body_html: None,
    }
}

fn snapshot(total: u64, pre_total: u64, sys: u64, pre_sys: u64, usage: u64, limit: u64) -> serde_json::Value {
    json!({
        "cpu_stats": {
            "cpu_usage": { "total_usage": total },
            "system_cpu_usage": sys,
            "online_cpus": 2,
        },
        "precpu_stats": {
            "cpu_usage": { "total_usage": pre_total },
            "system_cpu_usage": pre_sys,
        },
        "memory_stats": { "usage": usage, "limit": limit },
    })
}

#[test]
fn test_create_returns_running_handle() {
    let runtime = FakeRuntime::default();
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let handle = orch.create_mail_container().unwrap();
    assert!(handle.is_running());
    assert_eq!(orch.inspect(&handle.id).unwrap(), handle);
}

#[test]
fn test_list_joins_counts_and_uptime() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.add("c2", ContainerStatus::Exited);
    let store = LogStore::open_in_memory().unwrap();
    store
        .upsert_deliveries("c1", &[sent("c1", "a@x", 1.0), sent("c1", "b@x", 2.0)])
        .unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let summaries = orch.list_containers().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, "c1");
    assert_eq!(summaries[0].emails_sent, 2);
    assert!(summaries[0].uptime_seconds > 0);
    assert_eq!(summaries[0].base_email, "base@localhost");
    assert_eq!(summaries[0].user_count, 3);
    assert_eq!(summaries[1].emails_sent, 0);
    assert_eq!(summaries[1].uptime_seconds, 0);
}

#[test]
fn test_remove_unknown_keeps_store() {
    let runtime = FakeRuntime::default();
    let store = LogStore::open_in_memory().unwrap();
    store.upsert_delivery(&sent("ghost", "a@x", 1.0)).unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let err = orch.remove_container("ghost").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.count_deliveries("ghost").unwrap(), 1);
}

#[test]
fn test_remove_by_name_deletes_records() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    let store = LogStore::open_in_memory().unwrap();
    store.upsert_delivery(&sent("c1", "a@x", 1.0)).unwrap();
    store.upsert_delivery(&sent("mail-c1", "b@x", 1.0)).unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    orch.remove_container("mail-c1").unwrap();
    assert!(runtime.get("c1").unwrap_err().is_not_found());
    assert_eq!(store.count_deliveries("c1").unwrap(), 0);
    assert_eq!(store.count_deliveries("mail-c1").unwrap(), 0);
}

#[test]
fn test_stats_for_unknown_container() {
    let runtime = FakeRuntime::default();
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);
    assert!(matches!(
        orch.compute_stats("nope"),
        Err(PoolError::NotFound(_))
    ));
}

#[test]
fn test_stats_zero_system_delta() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime
        .with("c1", |c| c.stats = snapshot(500, 100, 1_000, 1_000, 64, 0))
        .unwrap();
    let store = LogStore::open_in_memory().unwrap();
    store.upsert_delivery(&sent("c1", "a@x", 1.0)).unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let stats = orch.compute_stats("c1").unwrap();
    assert_eq!(stats.cpu_percent, 0.0);
    assert_eq!(stats.memory_percent, 0.0);
    assert_eq!(stats.memory_usage, 64);
    assert_eq!(stats.emails_sent, 1);
}

#[test]
fn test_stats_percentages() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime
        .with("c1", |c| c.stats = snapshot(350, 100, 2_000, 1_000, 512, 2_048))
        .unwrap();
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let stats = orch.compute_stats("c1").unwrap();
    assert!((stats.cpu_percent - 50.0).abs() < 1e-9);
    assert!((stats.memory_percent - 25.0).abs() < 1e-9);
}

#[test]
fn test_stats_malformed_snapshot_zero_fills() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime
        .with("c1", |c| c.stats = json!({ "read": "2024-01-01T00:00:00Z" }))
        .unwrap();
    let store = LogStore::open_in_memory().unwrap();
    store.upsert_delivery(&sent("c1", "a@x", 1.0)).unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let stats = orch.compute_stats("c1").unwrap();
    assert_eq!(stats.cpu_percent, 0.0);
    assert_eq!(stats.memory_usage, 0);
    assert_eq!(stats.memory_limit, 0);
    assert_eq!(stats.memory_percent, 0.0);
    assert_eq!(stats.emails_sent, 1);
}

#[test]
fn test_logs_error_filter() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime
        .with("c1", |c| c.logs = "ok\nError: bad\nREJECTED sender\n".into())
        .unwrap();
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    assert_eq!(
        orch.fetch_logs("c1", 200, LogFilter::Error).unwrap(),
        "Error: bad\nREJECTED sender"
    );
    assert_eq!(orch.fetch_logs("c1", 1, LogFilter::None).unwrap(), "REJECTED sender");
}

#[test]
fn test_sync_mailboxes_reports_partial_failures() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "1704187800.M1.host", PLAIN);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "1704187860.M2.host", MULTIPART);
    runtime.put_mail("c1", "/home/user3/Maildir/new", "broken", b"   \n");
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let progress = RefCell::new(Vec::new());
    let report = orch
        .sync_mailboxes(
            "c1",
            &UserSelector::All,
            Some(&|done, total| progress.borrow_mut().push((done, total))),
        )
        .unwrap();

    assert_eq!(report.mails.len(), 2);
    assert_eq!(tally(&report.units), (2, 1, 1));
    assert!(matches!(
        report.units.iter().find(|u| u.unit == "user2").unwrap().outcome,
        UnitOutcome::Skipped(_)
    ));
    assert_eq!(*progress.borrow(), vec![(1, 3), (2, 3), (3, 3)]);

    let multipart = report
        .mails
        .iter()
        .find(|m| m.body_html.is_some())
        .unwrap();
    assert_eq!(multipart.from.as_deref(), Some("Base Sender <base@localhost>"));
    assert_eq!(multipart.body_snippet.trim_end(), "Hi user1, your weekly digest is ready.");

    let stored = store.query_deliveries("c1").unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| r.status.is_success()));
    assert_eq!(stored[0].subject, "Automated Test 7310");
}

#[test]
fn test_sync_twice_does_not_duplicate() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "a", PLAIN);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(1);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    assert_eq!(store.count_deliveries("c1").unwrap(), 1);
}

#[test]
fn test_sync_explicit_selection_only_touches_selected() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "a", PLAIN);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(5);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let selector: UserSelector = "2,x,4".parse().unwrap();
    let report = orch.sync_mailboxes("c1", &selector, None).unwrap();
    assert!(report.mails.is_empty());
    let units: Vec<&str> = report.units.iter().map(|u| u.unit.as_str()).collect();
    assert_eq!(units, vec!["user2", "user4"]);
}

#[test]
fn test_remote_mailer_starts_stopped_container() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Exited);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let run = orch.run_remote_mailer("mail-c1").unwrap();
    assert!(run.success());
    assert_eq!(run.text(), "done\n");
    assert!(runtime.get("c1").unwrap().is_running());

    let execs = runtime.execs.borrow();
    let (id, argv) = execs.last().unwrap();
    assert_eq!(id, "c1");
    assert_eq!(argv, &["mailpool", "campaign", "--container-id", "c1"]);
}

#[test]
fn test_provision_reports_each_user() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(3);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let reports = orch.provision_mailboxes("c1").unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(tally(&reports), (2, 0, 1));
    assert!(matches!(&reports[1].outcome, UnitOutcome::Failed(r) if r.contains("cannot lock")));
}

#[test]
fn test_failing_mailer_exit_code_is_returned() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    let store = LogStore::open_in_memory().unwrap();
    let mut cfg = config(3);
    cfg.runtime.mailer_command = vec!["false".into(), "{id}".into()];
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let run = orch.run_remote_mailer("c1").unwrap();
    assert!(!run.success());
    assert_eq!(run.exit_code, 1);
    assert_eq!(run.text(), "smtp connect failed\n");
}

#[test]
fn test_undated_messages_with_same_subject_are_kept_apart() {
    let undated = b"To: user1@localhost\r\nSubject: Same\r\n\r\nfirst body\r\n";
    let other = b"To: user1@localhost\r\nSubject: Same\r\n\r\nsecond body\r\n";
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "m1", undated);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "m2", other);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(1);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    let report = orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    assert_eq!(report.mails.len(), 2);

    let stored = store.query_deliveries("c1").unwrap();
    assert_eq!(stored.len(), 2);
    let mut snippets: Vec<&str> = stored.iter().map(|r| r.body_snippet.trim_end()).collect();
    snippets.sort();
    assert_eq!(snippets, vec!["first body", "second body"]);
}

#[test]
fn test_same_second_dated_messages_are_kept_apart() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "1704187800.M1.host", PLAIN);
    runtime.put_mail("c1", "/home/user1/Maildir/new", "1704187800.M2.host", PLAIN);
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(1);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    assert_eq!(store.count_deliveries("c1").unwrap(), 2);
}

#[test]
fn test_rescrape_of_undated_message_replaces_row() {
    let runtime = FakeRuntime::default();
    runtime.add("c1", ContainerStatus::Running);
    runtime.put_mail(
        "c1",
        "/home/user1/Maildir/new",
        "m1",
        b"To: user1@localhost\r\nSubject: No date\r\n\r\nbody\r\n",
    );
    let store = LogStore::open_in_memory().unwrap();
    let cfg = config(1);
    let orch = ContainerOrchestrator::new(&runtime, &store, &cfg);

    orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    let first = store.query_deliveries("c1").unwrap();
    orch.sync_mailboxes("c1", &UserSelector::All, None).unwrap();
    let second = store.query_deliveries("c1").unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(first[0].timestamp, second[0].timestamp);
}
