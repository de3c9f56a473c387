//! Mail scraped out of a container mailbox.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::delivery::{DeliveryRecord, DeliveryStatus};

/// Structured view of one raw message found in a synthetic mailbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedMail {
    /// Mailbox owner (e.g. `user7`).
    pub user: String,
    /// `From:` header, decoded.
    pub from: Option<String>,
    /// `To:` header, decoded.
    pub to: Option<String>,
    /// `Subject:` header, decoded.
    pub subject: Option<String>,
    /// `Date:` header in RFC 3339 form.
    pub date: Option<String>,
    /// `Date:` header as seconds since the Unix epoch.
    #[serde(skip)]
    pub date_epoch: Option<i64>,
    /// Start of the plain-text body.
    pub body_snippet: String,
    /// HTML body, when the message has one.
    pub body_html: Option<String>,
    /// Always `success`: the mailbox only shows delivered mail.
    pub status: DeliveryStatus,
    /// Mailbox file the message was read from (its Maildir unique name).
    pub source: String,
}

impl ParsedMail {
    /// Convert to a delivery record owned by `container_id`, keyed by
    /// [`Self::record_timestamp`].
    pub fn to_record(&self, container_id: &str) -> DeliveryRecord {
        DeliveryRecord {
            container_id: container_id.to_string(),
            recipient: self.to.clone().unwrap_or_else(|| self.user.clone()),
            subject: self.subject.clone().unwrap_or_default(),
            status: self.status.clone(),
            timestamp: self.record_timestamp(),
            body_snippet: self.body_snippet.clone(),
            body_html: self.body_html.clone(),
        }
    }

    /// Timestamp under which this message is stored.
    ///
    /// Whole seconds come from the `Date:` header, else from the delivery
    /// time at the start of a Maildir file name (`<secs>.<unique>.<host>`),
    /// else 0. The microsecond fraction is derived from the file name:
    /// distinct files sharing a second get distinct keys, and reading the
    /// same file again yields the same key.
    pub fn record_timestamp(&self) -> f64 {
        let secs = self
            .date_epoch
            .or_else(|| maildir_delivery_epoch(&self.source))
            .unwrap_or(0);
        secs as f64 + source_fraction(&self.source)
    }
}

fn maildir_delivery_epoch(name: &str) -> Option<i64> {
    name.split('.').next()?.parse().ok()
}

/// Stable value in `[0, 1)` with microsecond resolution.
fn source_fraction(name: &str) -> f64 {
    let digest = Sha256::digest(name.as_bytes());
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(n % 1_000_000) / 1_000_000.0
}
