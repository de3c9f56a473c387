//! Best-effort scraping of synthetic user mailboxes inside a container.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::MailboxConfig;
use crate::model::container::{ContainerHandle, UserSelector};
use crate::model::mail::ParsedMail;
use crate::model::outcome::{UnitOutcome, UnitReport};
use crate::parser::mime;
use crate::runtime::ContainerRuntime;

/// Everything one extraction pass produced.
///
/// `units` has one entry per mailbox listing that failed or was skipped and
/// one entry per message file, so callers can see partial failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub container_id: String,
    pub mails: Vec<ParsedMail>,
    pub units: Vec<UnitReport>,
}

/// Reads mailbox files out of a running container through `exec`.
pub struct MailExtractor<'a, R: ContainerRuntime> {
    runtime: &'a R,
    mailbox: &'a MailboxConfig,
}

impl<'a, R: ContainerRuntime> MailExtractor<'a, R> {
    pub fn new(runtime: &'a R, mailbox: &'a MailboxConfig) -> Self {
        Self { runtime, mailbox }
    }

    /// Scrape the new-mail directory of every selected user.
    ///
    /// Never fails as a whole: a user whose directory cannot be listed, or a
    /// message that cannot be read or parsed, is recorded in `units` and
    /// skipped. Nothing is persisted here.
    pub fn extract(
        &self,
        container: &ContainerHandle,
        selector: &UserSelector,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> ExtractionReport {
        let users = selector.indices(self.mailbox.user_count);
        let total = users.len();
        let mut report = ExtractionReport {
            container_id: container.id.clone(),
            ..ExtractionReport::default()
        };

        for (done, i) in users.into_iter().enumerate() {
            self.extract_user(container, i, &mut report);
            if let Some(cb) = progress {
                cb(done + 1, total);
            }
        }

        debug!(
            container = %container.id,
            mails = report.mails.len(),
            units = report.units.len(),
            "Mailbox extraction finished"
        );
        report
    }

    fn extract_user(&self, container: &ContainerHandle, i: u32, report: &mut ExtractionReport) {
        let user = self.mailbox.user_name(i);
        let dir = self.mailbox.maildir_for(i);

        let listing = match self.runtime.exec(&container.id, &["ls", &dir]) {
            Ok(out) if out.success() => out.text(),
            Ok(out) => {
                report.units.push(UnitReport::new(
                    &user,
                    UnitOutcome::Skipped(format!("cannot list {dir} (exit {})", out.exit_code)),
                ));
                return;
            }
            Err(e) => {
                warn!(container = %container.id, user = %user, error = %e, "Mailbox listing failed");
                report
                    .units
                    .push(UnitReport::new(&user, UnitOutcome::Failed(e.to_string())));
                return;
            }
        };

        for file in listing.lines().map(str::trim).filter(|f| !f.is_empty()) {
            let unit = format!("{user}/{file}");
            let path = format!("{dir}/{file}");
            let outcome = match self.runtime.exec(&container.id, &["cat", &path]) {
                Ok(out) if out.success() => match mime::parse_mail(&out.output, &user) {
                    Ok(mut mail) => {
                        mail.source = file.to_string();
                        report.mails.push(mail);
                        UnitOutcome::Ok
                    }
                    Err(e) => UnitOutcome::Failed(e.to_string()),
                },
                Ok(out) => UnitOutcome::Skipped(format!("cannot read (exit {})", out.exit_code)),
                Err(e) => UnitOutcome::Failed(e.to_string()),
            };
            report.units.push(UnitReport::new(unit, outcome));
        }
    }
}
