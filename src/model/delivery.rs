//! Delivery records and their status encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum number of characters of body text kept in the log store.
pub const MAX_SNIPPET_CHARS: usize = 300;

/// Outcome of one delivery attempt (or one extracted mailbox message).
///
/// Stored as text: `success`, `pending`, or `failure:<reason>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Pending,
    Failure(String),
}

impl DeliveryStatus {
    /// Build a failure status from any displayable reason.
    pub fn failure(reason: impl fmt::Display) -> Self {
        Self::Failure(reason.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Pending => f.write_str("pending"),
            Self::Failure(reason) => write!(f, "failure:{reason}"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = std::convert::Infallible;

    /// Parsing never fails: unknown values are kept as failure reasons so that
    /// rows written by older tools stay readable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => Self::Success,
            "pending" => Self::Pending,
            other => match other.strip_prefix("failure:") {
                Some(reason) => Self::Failure(reason.trim_start().to_string()),
                None => Self::Failure(other.to_string()),
            },
        })
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|never| match never {}))
    }
}

/// One logged outcome for one recipient.
///
/// The natural key is `(container_id, recipient, subject, timestamp)`:
/// writing a record with the same key replaces the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Container the mail was sent from or extracted out of.
    pub container_id: String,
    /// Recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Delivery outcome.
    pub status: DeliveryStatus,
    /// Seconds since the Unix epoch (fractional).
    pub timestamp: f64,
    /// Start of the body text, at most [`MAX_SNIPPET_CHARS`] once stored.
    pub body_snippet: String,
    /// HTML body, when one was sent or found.
    pub body_html: Option<String>,
}

impl DeliveryRecord {
    /// Return a copy of `snippet` limited to [`MAX_SNIPPET_CHARS`] characters.
    pub fn clamp_snippet(snippet: &str) -> String {
        truncate_chars(snippet, MAX_SNIPPET_CHARS).to_string()
    }
}

/// Truncate to at most `max` characters, preserving the exact prefix.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// The part of an address before `@` (the whole string if there is none).
pub fn local_part(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}
