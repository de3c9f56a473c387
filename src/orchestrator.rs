//! Lifecycle and rollups for mail-server containers.
//!
//! Every operation reads live state from the runtime and joins it with the
//! log store at call time; nothing derived is cached.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::extractor::{ExtractionReport, MailExtractor};
use crate::model::container::{
    ContainerHandle, ContainerStats, ContainerSummary, ExecOutput, LogFilter, UserSelector,
};
use crate::model::outcome::{UnitOutcome, UnitReport};
use crate::runtime::ContainerRuntime;
use crate::store::LogStore;

/// Start-time layout reported by the runtime, once fractional seconds and
/// the zone suffix are dropped.
const STARTED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Placeholder in `runtime.mailer_command` replaced with the container id.
const ID_PLACEHOLDER: &str = "{id}";

/// Drives the runtime and keeps the log store consistent with it.
pub struct ContainerOrchestrator<'a, R: ContainerRuntime> {
    runtime: &'a R,
    store: &'a LogStore,
    config: &'a Config,
}

impl<'a, R: ContainerRuntime> ContainerOrchestrator<'a, R> {
    pub fn new(runtime: &'a R, store: &'a LogStore, config: &'a Config) -> Self {
        Self {
            runtime,
            store,
            config,
        }
    }

    /// Launch a new mail-server container. Does not wait for it to be ready.
    pub fn create_mail_container(&self) -> Result<ContainerHandle> {
        self.runtime
            .create(&self.config.runtime.image, self.config.runtime.smtp_port)
    }

    /// Current runtime view of one container.
    pub fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        self.runtime.get(id)
    }

    /// Every container with its uptime and logged mail count.
    pub fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let now = Utc::now();
        self.runtime
            .list(true)?
            .into_iter()
            .map(|handle| {
                Ok(ContainerSummary {
                    emails_sent: self.store.count_deliveries(&handle.id)?,
                    uptime_seconds: compute_uptime(&handle, now),
                    base_email: self.config.mailbox.base_email.clone(),
                    user_count: self.config.mailbox.user_count,
                    id: handle.id,
                    name: handle.name,
                    status: handle.status,
                })
            })
            .collect()
    }

    /// Force-remove a container and drop its delivery records.
    ///
    /// An unknown id yields `NotFound` and leaves the store untouched.
    pub fn remove_container(&self, id: &str) -> Result<()> {
        let handle = self.runtime.get(id)?;
        self.runtime.remove(&handle.id, true)?;
        self.store.delete_deliveries(&handle.id)?;
        if handle.id != id {
            // Rows recorded under a name or short id.
            self.store.delete_deliveries(id)?;
        }
        info!(container = %handle.id, "Removed container");
        Ok(())
    }

    /// Usage and delivery figures for one container.
    ///
    /// Usage comes from a single runtime snapshot; if that snapshot cannot be
    /// fetched or parsed the usage figures are all zero.
    pub fn compute_stats(&self, id: &str) -> Result<ContainerStats> {
        let handle = self.runtime.get(id)?;
        let usage = match self.runtime.stats(&handle.id) {
            Ok(snapshot) => usage_from_snapshot(&snapshot).unwrap_or_else(|e| {
                warn!(container = %handle.id, error = %e, "Unusable stats snapshot");
                Usage::default()
            }),
            Err(e) => {
                warn!(container = %handle.id, error = %e, "Stats unavailable");
                Usage::default()
            }
        };

        Ok(ContainerStats {
            container_id: handle.id.clone(),
            emails_sent: self.store.count_deliveries(&handle.id)?,
            uptime_seconds: compute_uptime(&handle, Utc::now()),
            cpu_percent: usage.cpu_percent,
            memory_usage: usage.memory_usage,
            memory_limit: usage.memory_limit,
            memory_percent: usage.memory_percent,
        })
    }

    /// The last `tail` log lines, optionally filtered.
    pub fn fetch_logs(&self, id: &str, tail: usize, filter: LogFilter) -> Result<String> {
        let handle = self.runtime.get(id)?;
        let raw = self.runtime.logs(&handle.id, tail)?;
        Ok(filter_log_lines(&raw, tail, filter))
    }

    /// Run the mail-sending program inside the container.
    ///
    /// A mailer that runs but exits non-zero is not an error here; its exit
    /// code and combined output are returned for the caller to judge.
    pub fn run_remote_mailer(&self, id: &str) -> Result<ExecOutput> {
        let handle = self.ensure_running(id)?;
        let argv: Vec<String> = self
            .config
            .runtime
            .mailer_command
            .iter()
            .map(|arg| arg.replace(ID_PLACEHOLDER, &handle.id))
            .collect();
        if argv.is_empty() {
            return Err(PoolError::Config("runtime.mailer_command is empty".into()));
        }
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();

        let out = self.runtime.exec(&handle.id, &argv)?;
        if !out.success() {
            warn!(container = %handle.id, exit_code = out.exit_code, "Mailer exited with failure");
        }
        Ok(out)
    }

    /// Make sure every synthetic user and its Maildir exist in the container.
    pub fn provision_mailboxes(&self, id: &str) -> Result<Vec<UnitReport>> {
        let handle = self.ensure_running(id)?;
        let mailbox = &self.config.mailbox;

        let reports = (1..=mailbox.user_count)
            .map(|i| {
                let user = mailbox.user_name(i);
                let new_dir = mailbox.maildir_for(i);
                let root = new_dir.strip_suffix("/new").unwrap_or(&new_dir);
                let script = format!(
                    "id {user} >/dev/null 2>&1 || useradd -m {user} && \
                     mkdir -p {root}/cur {root}/new {root}/tmp && chown -R {user} {root}"
                );
                let outcome = match self.runtime.exec(&handle.id, &["sh", "-c", &script]) {
                    Ok(out) if out.success() => UnitOutcome::Ok,
                    Ok(out) => UnitOutcome::Failed(format!(
                        "exit {}: {}",
                        out.exit_code,
                        out.text().trim()
                    )),
                    Err(e) => UnitOutcome::Failed(e.to_string()),
                };
                UnitReport::new(user, outcome)
            })
            .collect();
        Ok(reports)
    }

    /// Scrape the selected mailboxes and commit what was found to the store.
    pub fn sync_mailboxes(
        &self,
        id: &str,
        selector: &UserSelector,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<ExtractionReport> {
        let handle = self.runtime.get(id)?;
        let report =
            MailExtractor::new(self.runtime, &self.config.mailbox).extract(&handle, selector, progress);

        let records: Vec<_> = report
            .mails
            .iter()
            .map(|mail| mail.to_record(&handle.id))
            .collect();
        self.store.upsert_deliveries(&handle.id, &records)?;
        Ok(report)
    }

    /// Delivery log of a container, resolving names to ids when the
    /// container still exists.
    pub fn delivery_log(&self, id: &str) -> Result<Vec<crate::model::delivery::DeliveryRecord>> {
        let key = match self.runtime.get(id) {
            Ok(handle) => handle.id,
            Err(PoolError::NotFound(_)) => id.to_string(),
            Err(e) => return Err(e),
        };
        self.store.query_deliveries(&key)
    }

    fn ensure_running(&self, id: &str) -> Result<ContainerHandle> {
        let handle = self.runtime.get(id)?;
        if handle.is_running() {
            return Ok(handle);
        }
        self.runtime.start(&handle.id)?;
        info!(container = %handle.id, "Started container");
        self.runtime.get(&handle.id)
    }
}

/// Whole seconds since the container started; 0 when it is not running or
/// the start time cannot be read.
pub fn compute_uptime(handle: &ContainerHandle, now: DateTime<Utc>) -> u64 {
    if !handle.is_running() {
        return 0;
    }
    let Some(raw) = handle.started_at.as_deref() else {
        return 0;
    };
    let whole = raw.split('.').next().unwrap_or(raw).trim_end_matches('Z');
    match NaiveDateTime::parse_from_str(whole, STARTED_AT_FORMAT) {
        Ok(start) => u64::try_from((now - start.and_utc()).num_seconds()).unwrap_or(0),
        Err(_) => 0,
    }
}

/// Keep the last `tail` lines of `raw` that pass `filter`, newline-joined.
pub fn filter_log_lines(raw: &str, tail: usize, filter: LogFilter) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(tail);
    lines[start..]
        .iter()
        .copied()
        .filter(|line| filter.keeps(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Usage figures derived from one runtime snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
}

#[derive(Deserialize)]
struct Snapshot {
    cpu_stats: CpuStats,
    precpu_stats: CpuStats,
    memory_stats: MemoryStats,
}

#[derive(Deserialize)]
struct CpuStats {
    cpu_usage: CpuUsage,
    system_cpu_usage: u64,
    online_cpus: Option<u64>,
}

#[derive(Deserialize)]
struct CpuUsage {
    total_usage: u64,
    percpu_usage: Option<Vec<u64>>,
}

#[derive(Deserialize)]
struct MemoryStats {
    usage: u64,
    limit: u64,
}

/// Compute CPU and memory percentages from a raw snapshot.
///
/// `cpu% = cpu_delta / system_delta * cpus * 100`, 0.0 when `system_delta
/// <= 0`; `mem% = usage / limit * 100`, 0.0 when `limit == 0`.
pub fn usage_from_snapshot(snapshot: &serde_json::Value) -> Result<Usage> {
    let snap = Snapshot::deserialize(snapshot).map_err(|e| PoolError::Parse(e.to_string()))?;

    let cpus = snap
        .cpu_stats
        .online_cpus
        .filter(|&n| n > 0)
        .or_else(|| {
            snap.cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u64)
        })
        .ok_or_else(|| PoolError::Parse("snapshot does not report a CPU count".into()))?;

    let cpu_delta =
        snap.cpu_stats.cpu_usage.total_usage as f64 - snap.precpu_stats.cpu_usage.total_usage as f64;
    let system_delta =
        snap.cpu_stats.system_cpu_usage as f64 - snap.precpu_stats.system_cpu_usage as f64;
    let cpu_percent = if system_delta > 0.0 {
        cpu_delta / system_delta * cpus as f64 * 100.0
    } else {
        0.0
    };

    let MemoryStats { usage, limit } = snap.memory_stats;
    let memory_percent = if limit > 0 {
        usage as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    Ok(Usage {
        cpu_percent,
        memory_usage: usage,
        memory_limit: limit,
        memory_percent,
    })
}
