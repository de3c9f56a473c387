//! Templated send campaigns.
//!
//! A campaign shuffles the recipients, splits them into one contiguous group
//! per template, and sends each recipient the rendered template (or a
//! generated plain-text body when the template has no HTML). Every attempt is
//! logged twice under the same key: `pending` before the send, then the
//! final status.

pub mod quotes;
pub mod templates;
pub mod transport;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::delivery::{local_part, truncate_chars, DeliveryRecord, DeliveryStatus};
use crate::model::outcome::{UnitOutcome, UnitReport};
use crate::model::template::Template;
use crate::store::LogStore;

use quotes::{fallback_body, QuoteSource};
use transport::{BodyKind, MailTransport, OutgoingMail};

/// Characters of the sent body kept on the delivery record.
pub const SEND_SNIPPET_CHARS: usize = 100;

/// Split `items` into `groups` contiguous chunks of `len / groups` items;
/// the last chunk also takes the remainder.
///
/// `groups == 0` yields no chunks.
pub fn partition<T: Clone>(items: &[T], groups: usize) -> Vec<Vec<T>> {
    if groups == 0 {
        return Vec::new();
    }
    let size = items.len() / groups;
    (0..groups)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == groups {
                items.len()
            } else {
                start + size
            };
            items[start..end].to_vec()
        })
        .collect()
}

/// Wall-clock seconds that never repeat or go backwards within one run.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: Option<f64>,
}

impl MonotonicClock {
    const STEP: f64 = 1e-6;

    fn next(&mut self) -> f64 {
        self.advance(chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0)
    }

    fn advance(&mut self, now: f64) -> f64 {
        let ts = match self.last {
            Some(last) if now <= last => last + Self::STEP,
            _ => now,
        };
        self.last = Some(ts);
        ts
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignResult {
    pub sent: usize,
    pub failed: usize,
    /// One entry per recipient, in send order.
    pub outcomes: Vec<UnitReport>,
}

/// Sends one campaign from inside (or on behalf of) a container.
pub struct CampaignRunner<'a, T: MailTransport, Q: QuoteSource + ?Sized> {
    store: &'a LogStore,
    transport: &'a T,
    quotes: &'a Q,
    container_id: String,
    from: String,
    subject_prefix: String,
}

impl<'a, T: MailTransport, Q: QuoteSource + ?Sized> CampaignRunner<'a, T, Q> {
    pub fn new(
        store: &'a LogStore,
        transport: &'a T,
        quotes: &'a Q,
        container_id: impl Into<String>,
        from: impl Into<String>,
        subject_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            quotes,
            container_id: container_id.into(),
            from: from.into(),
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn run(&self, recipients: &[String], templates: &[Template]) -> Result<CampaignResult> {
        self.run_with_rng(recipients, templates, &mut rand::thread_rng())
    }

    /// Run with a caller-supplied random source (shuffle, subjects, bodies).
    ///
    /// Fails only if the transport cannot be opened or the store cannot be
    /// written; individual send failures are counted and logged.
    pub fn run_with_rng<G: Rng>(
        &self,
        recipients: &[String],
        templates: &[Template],
        rng: &mut G,
    ) -> Result<CampaignResult> {
        self.transport.open()?;

        let pass_through = [Template::pass_through()];
        let templates = if templates.is_empty() {
            &pass_through[..]
        } else {
            templates
        };

        let mut shuffled = recipients.to_vec();
        shuffled.shuffle(rng);
        let groups = partition(&shuffled, templates.len());

        let mut clock = MonotonicClock::default();
        let mut result = CampaignResult::default();
        for (template, group) in templates.iter().zip(groups) {
            info!(template = %template.name, recipients = group.len(), "Sending template");
            for recipient in &group {
                let report = self.send_one(template, recipient, &mut clock, rng)?;
                if report.outcome.is_ok() {
                    result.sent += 1;
                } else {
                    result.failed += 1;
                }
                result.outcomes.push(report);
            }
        }

        info!(
            container = %self.container_id,
            sent = result.sent,
            failed = result.failed,
            "Campaign finished"
        );
        Ok(result)
    }

    fn send_one<G: Rng>(
        &self,
        template: &Template,
        recipient: &str,
        clock: &mut MonotonicClock,
        rng: &mut G,
    ) -> Result<UnitReport> {
        let subject = format!("{} {}", self.subject_prefix, rng.gen_range(1000..=9999));
        let (body, kind, body_html) = match template.render(local_part(recipient)) {
            Some(html) => (html.clone(), BodyKind::Html, Some(html)),
            None => (
                fallback_body(recipient, self.quotes, rng),
                BodyKind::Plain,
                None,
            ),
        };

        let mut record = DeliveryRecord {
            container_id: self.container_id.clone(),
            recipient: recipient.to_string(),
            subject,
            status: DeliveryStatus::Pending,
            timestamp: clock.next(),
            body_snippet: truncate_chars(&body, SEND_SNIPPET_CHARS).to_string(),
            body_html,
        };
        self.store.upsert_delivery(&record)?;

        let mail = OutgoingMail {
            from: &self.from,
            to: recipient,
            subject: &record.subject,
            body: &body,
            kind,
        };
        let outcome = match self.transport.send_mail(&mail) {
            Ok(()) => {
                record.status = DeliveryStatus::Success;
                UnitOutcome::Ok
            }
            Err(e) => {
                warn!(recipient, error = %e, "Send failed");
                record.status = DeliveryStatus::failure(&e);
                UnitOutcome::Failed(e.0)
            }
        };
        self.store.upsert_delivery(&record)?;
        Ok(UnitReport::new(recipient, outcome))
    }
}
