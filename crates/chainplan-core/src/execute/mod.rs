//! Execution: reconciliation, scheduling and the run report.

pub mod action;
pub mod reconcile;
pub mod report;
pub mod scheduler;

pub use action::{ResolvedAction, resolve_action};
pub use reconcile::{Reconciliation, reconcile};
pub use report::{FutureOutcome, ReportSummary, RunReport};
pub use scheduler::{AbortSignal, DEFAULT_MAX_CONCURRENCY, RunOptions, Scheduler};
