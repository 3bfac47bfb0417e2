//! Pre-flight reconciliation of the journal against the current build and
//! the chain.
//!
//! Runs before any new work is dispatched:
//! - every confirmed nonce in the journal must already be consumed on the
//!   chain, otherwise the journal describes some other chain;
//! - completed entries are checked against the current input fingerprint
//!   and their results become available to dependents;
//! - pending entries with a transaction reference are resolved from the
//!   chain when it knows the outcome;
//! - pending entries without a reference are re-executed only if their
//!   nonce was never consumed;
//! - failed entries are retried;
//! - entries with no matching future are reported as orphans.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::chain::{Accounts, ChainClient, ReceiptStatus, TxHash};
use crate::error::{DeployError, ExecutionError, JournalError};
use crate::fingerprint::fingerprint;
use crate::future::{Future, FutureRegistry};
use crate::graph::DependencyGraph;
use crate::journal::{EntryStatus, Journal, JournalRecord};
use crate::types::{Address, FutureId, Value};

use super::action::{receipt_result, resolve_action};
use super::report::FutureOutcome;

/// State carried from reconciliation into execution.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Results of futures already completed, by id.
    pub results: BTreeMap<FutureId, Value>,
    /// Outcomes settled before execution: skipped, recovered or unknown.
    pub outcomes: BTreeMap<FutureId, FutureOutcome>,
    pub orphaned: Vec<FutureId>,
}

pub async fn reconcile(
    registry: &FutureRegistry,
    graph: &DependencyGraph,
    journal: &mut Journal,
    chain: &dyn ChainClient,
    accounts: &Accounts,
) -> Result<Reconciliation, DeployError> {
    verify_chain_history(journal, chain).await?;
    let mut state = Reconciliation::default();

    for id in graph.order() {
        let (Some(entry), Some(future)) = (journal.get(id).cloned(), registry.get(id)) else {
            continue;
        };

        match entry.status {
            EntryStatus::Completed => {
                if let Some(dep) = graph
                    .dependencies(id)
                    .find(|dep| !state.results.contains_key(*dep))
                {
                    return Err(JournalError::FingerprintMismatch {
                        future_id: id.clone(),
                        recorded: entry.input_fingerprint.clone(),
                        current: format!("<dependency '{dep}' is not completed>"),
                    }
                    .into());
                }
                verify_fingerprint(future, &entry, &state.results, accounts)?;
                let result = entry.result.clone().ok_or_else(|| JournalError::Corruption {
                    line: 0,
                    detail: format!("completed entry for '{id}' has no result"),
                })?;
                debug!(future = id.as_str(), "already completed");
                state.results.insert(id.clone(), result.clone());
                state.outcomes.insert(id.clone(), FutureOutcome::Skipped { result });
            }
            EntryStatus::Pending => {
                if let Some(reference) = &entry.external_reference {
                    recover_submitted(future, &entry, reference, journal, chain, accounts, &mut state)
                        .await?;
                } else if let (Some(sender), Some(nonce)) = (entry.sender, entry.nonce) {
                    let count = chain.transaction_count(sender).await?;
                    if count > nonce {
                        warn!(
                            future = id.as_str(),
                            %sender,
                            nonce,
                            "nonce consumed but no transaction recorded"
                        );
                        state.outcomes.insert(
                            id.clone(),
                            FutureOutcome::PendingUnknown {
                                reason: format!(
                                    "nonce {nonce} of {sender} was consumed but no transaction was recorded"
                                ),
                            },
                        );
                    } else {
                        info!(future = id.as_str(), "interrupted before submission, will re-execute");
                    }
                } else {
                    debug!(future = id.as_str(), "pending local future, will re-execute");
                }
            }
            EntryStatus::Failed => {
                info!(
                    future = id.as_str(),
                    error = entry.error.as_deref().unwrap_or("unknown"),
                    "retrying previously failed future"
                );
            }
        }
    }

    for id in journal.entries().keys() {
        if !registry.contains(id) {
            warn!(future = id.as_str(), "journal entry has no matching future in this build");
            state.orphaned.push(id.clone());
        }
    }

    Ok(state)
}

/// Every completed transaction in the journal must be behind the chain's
/// current nonce for its sender.
async fn verify_chain_history(journal: &Journal, chain: &dyn ChainClient) -> Result<(), DeployError> {
    let mut highest: BTreeMap<Address, u64> = BTreeMap::new();
    for entry in journal.entries().values() {
        if !entry.is_completed() || entry.external_reference.is_none() {
            continue;
        }
        if let (Some(sender), Some(nonce)) = (entry.sender, entry.nonce) {
            let slot = highest.entry(sender).or_insert(nonce);
            *slot = (*slot).max(nonce);
        }
    }

    for (account, nonce) in highest {
        let count = chain.transaction_count(account).await?;
        if count <= nonce {
            return Err(DeployError::ChainMismatch {
                account: account.to_string(),
                nonce,
                count,
            });
        }
    }
    Ok(())
}

/// Compare the recorded fingerprint with the current one.
fn verify_fingerprint(
    future: &Future,
    entry: &JournalRecord,
    results: &BTreeMap<FutureId, Value>,
    accounts: &Accounts,
) -> Result<(), JournalError> {
    let current = match resolve_action(future, results, accounts) {
        Ok(action) => fingerprint(&future.id, &action)?,
        Err(err) => format!("<unresolvable: {err}>"),
    };
    if current != entry.input_fingerprint {
        return Err(JournalError::FingerprintMismatch {
            future_id: future.id.clone(),
            recorded: entry.input_fingerprint.clone(),
            current,
        });
    }
    Ok(())
}

async fn recover_submitted(
    future: &Future,
    entry: &JournalRecord,
    reference: &str,
    journal: &mut Journal,
    chain: &dyn ChainClient,
    accounts: &Accounts,
    state: &mut Reconciliation,
) -> Result<(), DeployError> {
    let id = &future.id;
    let Some(receipt) = chain.find_receipt(&TxHash::new(reference)).await? else {
        warn!(future = id.as_str(), tx = reference, "submitted transaction unknown to chain");
        state.outcomes.insert(
            id.clone(),
            FutureOutcome::PendingUnknown {
                reason: format!("transaction {reference} not found on chain"),
            },
        );
        return Ok(());
    };

    match receipt.status {
        ReceiptStatus::Success => {
            verify_fingerprint(future, entry, &state.results, accounts)?;
            let outcome = resolve_action(future, &state.results, accounts)
                .and_then(|action| receipt_result(&action, &receipt));
            match outcome {
                Ok(result) => {
                    info!(future = id.as_str(), tx = reference, "recovered confirmed transaction");
                    journal.record_completion(id, result.clone())?;
                    state.results.insert(id.clone(), result.clone());
                    state.outcomes.insert(
                        id.clone(),
                        FutureOutcome::Completed {
                            result,
                            tx_hash: Some(reference.to_string()),
                        },
                    );
                }
                Err(err) => journal.record_failure(id, &err.to_string())?,
            }
        }
        ReceiptStatus::Reverted { reason } => {
            let err = ExecutionError::TransactionReverted {
                tx_hash: reference.to_string(),
                reason,
            };
            info!(future = id.as_str(), error = %err, "submitted transaction reverted, will retry");
            journal.record_failure(id, &err.to_string())?;
        }
    }
    Ok(())
}
