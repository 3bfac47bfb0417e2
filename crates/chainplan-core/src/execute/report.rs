//! Run report: per-future outcome of one deployment run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{FutureId, Value};

/// Outcome of a single future in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FutureOutcome {
    /// Executed and confirmed in this run.
    Completed {
        result: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
    },
    /// Already completed by an earlier run.
    Skipped { result: Value },
    Failed { error: String },
    /// Not attempted because a dependency did not complete.
    Blocked { on: FutureId },
    /// A transaction may have been sent but its outcome is unknown.
    PendingUnknown { reason: String },
    /// Never dispatched because the run was aborted.
    NotStarted,
}

impl FutureOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FutureOutcome::Completed { .. } => "completed",
            FutureOutcome::Skipped { .. } => "skipped",
            FutureOutcome::Failed { .. } => "failed",
            FutureOutcome::Blocked { .. } => "blocked",
            FutureOutcome::PendingUnknown { .. } => "pending",
            FutureOutcome::NotStarted => "not started",
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            FutureOutcome::Completed { result, .. } | FutureOutcome::Skipped { result } => {
                Some(result)
            }
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            FutureOutcome::Completed { .. } | FutureOutcome::Skipped { .. }
        )
    }
}

/// Summary counts for quick overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    pub pending: usize,
    pub not_started: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: BTreeMap<FutureId, FutureOutcome>,
    /// Transactions accepted by the chain during this run.
    pub transactions_submitted: usize,
    /// Journal entries with no matching future in the current build.
    pub orphaned: Vec<FutureId>,
    pub aborted: bool,
}

impl RunReport {
    pub fn outcome(&self, id: &FutureId) -> Option<&FutureOutcome> {
        self.outcomes.get(id)
    }

    /// Every future completed, now or in an earlier run.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.outcomes.values().all(FutureOutcome::is_done)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for outcome in self.outcomes.values() {
            match outcome {
                FutureOutcome::Completed { .. } => summary.completed += 1,
                FutureOutcome::Skipped { .. } => summary.skipped += 1,
                FutureOutcome::Failed { .. } => summary.failed += 1,
                FutureOutcome::Blocked { .. } => summary.blocked += 1,
                FutureOutcome::PendingUnknown { .. } => summary.pending += 1,
                FutureOutcome::NotStarted => summary.not_started += 1,
            }
        }
        summary
    }

    /// Results of every done future, keyed by id.
    pub fn results(&self) -> BTreeMap<&FutureId, &Value> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.result().map(|r| (id, r)))
            .collect()
    }
}
