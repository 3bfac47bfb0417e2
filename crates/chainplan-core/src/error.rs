//! Error taxonomy for composition, journaling and execution.
//!
//! Build-time errors abort a run before anything is submitted. Execution
//! errors are recorded per future and only stop that future's dependents.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FutureId, ParamKind};

/// Errors raised while composing modules or building the dependency graph.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dependency cycle detected: {}", format_cycle(.members))]
    CycleDetected { members: Vec<FutureId> },

    #[error("Parameter '{name}' of module '{module}' has no value and no default")]
    UnresolvedParameter { module: String, name: String },

    #[error("Module '{module}' used with conflicting parameters: {detail}")]
    ConflictingParameterization { module: String, detail: String },

    #[error("Parameter '{name}' of module '{module}' expects {expected}: {detail}")]
    ParameterTypeMismatch {
        module: String,
        name: String,
        expected: ParamKind,
        detail: String,
    },

    #[error("Future '{0}' is declared more than once")]
    DuplicateFuture(FutureId),

    #[error("Future '{from}' references unknown future '{missing}'")]
    UnknownFuture { from: FutureId, missing: FutureId },

    #[error("Invalid reference in module '{module}': {detail}")]
    InvalidReference { module: String, detail: String },

    #[error("Module '{module}' failed to build: {detail}")]
    Module { module: String, detail: String },
}

fn format_cycle(members: &[FutureId]) -> String {
    members
        .iter()
        .map(FutureId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised by the execution journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal corrupted at line {line}: {detail}")]
    Corruption { line: usize, detail: String },

    #[error(
        "Journal fingerprint mismatch for '{future_id}': recorded {recorded}, current build {current}"
    )]
    FingerprintMismatch {
        future_id: FutureId,
        recorded: String,
        current: String,
    },

    #[error("Future '{0}' is already completed; completed journal entries are final")]
    AlreadyCompleted(FutureId),

    #[error("Journal I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-future execution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Transaction {tx_hash} reverted: {reason}")]
    TransactionReverted { tx_hash: String, reason: String },

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Result of '{0}' is not available")]
    MissingResult(FutureId),

    #[error("Target of call is not an address: {0}")]
    InvalidTarget(String),

    #[error("Unknown sending account: {0}")]
    UnknownAccount(String),
}

/// Failures reported by a chain client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Nonce mismatch for {account}: expected {expected}, got {actual}")]
    NonceMismatch {
        account: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error of a deployment run.
///
/// Execution failures are not represented here: they land in the run
/// report instead.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Reconciliation query failed: {0}")]
    Reconcile(#[from] TransportError),

    #[error(
        "Journal records a confirmed transaction with nonce {nonce} from {account}, but the chain reports only {count} transactions for it; the journal belongs to a different or reset chain"
    )]
    ChainMismatch {
        account: String,
        nonce: u64,
        count: u64,
    },
}

impl DeployError {
    /// Build-time failures abort with no side effects.
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            DeployError::Build(_)
                | DeployError::Journal(JournalError::FingerprintMismatch { .. })
                | DeployError::Journal(JournalError::Corruption { .. })
                | DeployError::ChainMismatch { .. }
        )
    }
}
