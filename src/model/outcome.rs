//! Per-unit results for best-effort loops (mailbox scraping, provisioning,
//! per-recipient sends).

use serde::Serialize;

/// What happened to one unit of a best-effort batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum UnitOutcome {
    Ok,
    Skipped(String),
    Failed(String),
}

impl UnitOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// A unit label paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

impl UnitReport {
    pub fn new(unit: impl Into<String>, outcome: UnitOutcome) -> Self {
        Self {
            unit: unit.into(),
            outcome,
        }
    }
}

/// Count `(ok, skipped, failed)` across a batch.
pub fn tally(reports: &[UnitReport]) -> (usize, usize, usize) {
    reports
        .iter()
        .fold((0, 0, 0), |(ok, skipped, failed), r| match r.outcome {
            UnitOutcome::Ok => (ok + 1, skipped, failed),
            UnitOutcome::Skipped(_) => (ok, skipped + 1, failed),
            UnitOutcome::Failed(_) => (ok, skipped, failed + 1),
        })
}
