//! Views of runtime-owned containers and the figures derived from them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Map the runtime's status word, case-insensitively.
    pub fn from_runtime(word: &str) -> Self {
        match word.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        f.write_str(word)
    }
}

/// Read-through reference to a container owned by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    /// Runtime start timestamp, only present while running.
    pub started_at: Option<String>,
}

impl ContainerHandle {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// One row of the container listing: handle fields plus figures joined in
/// from the log store at query time.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub base_email: String,
    pub user_count: u32,
    pub uptime_seconds: u64,
    pub emails_sent: u64,
}

/// Resource usage and delivery figures for one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerStats {
    pub container_id: String,
    pub emails_sent: u64,
    pub uptime_seconds: u64,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// Combined stdout and stderr, raw bytes.
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output decoded lossily as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Line filter for container log retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFilter {
    /// Every line.
    #[default]
    None,
    /// Lines mentioning "error" or "reject" (any case).
    Error,
}

impl LogFilter {
    /// Whether `line` passes this filter.
    pub fn keeps(self, line: &str) -> bool {
        match self {
            Self::None => true,
            Self::Error => {
                let lower = line.to_lowercase();
                lower.contains("error") || lower.contains("reject")
            }
        }
    }
}

/// Which synthetic users to scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserSelector {
    /// `1..=user_count`.
    #[default]
    All,
    /// An explicit set of user indices.
    Explicit(BTreeSet<u32>),
}

impl UserSelector {
    /// Resolve to concrete user indices, in ascending order.
    pub fn indices(&self, user_count: u32) -> Vec<u32> {
        match self {
            Self::All => (1..=user_count).collect(),
            Self::Explicit(set) => set.iter().copied().collect(),
        }
    }
}

impl FromStr for UserSelector {
    type Err = PoolError;

    /// Accepts `all`, an empty string, or a comma-separated list of indices.
    /// Tokens that are not plain integers are ignored; a list with no valid
    /// token at all is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let set: BTreeSet<u32> = trimmed
            .split(',')
            .filter_map(|tok| {
                let tok = tok.trim();
                if !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit()) {
                    tok.parse().ok()
                } else {
                    None
                }
            })
            .collect();
        if set.is_empty() {
            return Err(PoolError::Config(format!("no user index in '{s}'")));
        }
        Ok(Self::Explicit(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_runtime() {
        assert_eq!(ContainerStatus::from_runtime("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_runtime("EXITED"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_runtime("weird"), ContainerStatus::Unknown);
    }

    #[test]
    fn test_error_filter() {
        assert!(!LogFilter::Error.keeps("ok"));
        assert!(LogFilter::Error.keeps("Error: bad"));
        assert!(LogFilter::Error.keeps("REJECTED sender"));
        assert!(LogFilter::None.keeps("ok"));
    }

    #[test]
    fn test_user_selector_parsing() {
        assert_eq!("all".parse::<UserSelector>().unwrap(), UserSelector::All);
        assert_eq!("".parse::<UserSelector>().unwrap(), UserSelector::All);

        let sel: UserSelector = "3, 1,x,3,-2".parse().unwrap();
        assert_eq!(sel.indices(50), vec![1, 3]);

        assert!("x,y".parse::<UserSelector>().is_err());
    }

    #[test]
    fn test_user_selector_all_range() {
        let all = UserSelector::All.indices(50);
        assert_eq!(all.len(), 50);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&50));
    }
}
