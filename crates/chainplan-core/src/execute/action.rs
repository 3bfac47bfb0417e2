//! Resolution of a future's payload against completed results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::chain::{Accounts, Receipt, TransactionKind, TransactionRequest};
use crate::error::ExecutionError;
use crate::future::{Future, Payload};
use crate::types::{Address, FutureId, Value};

/// A future's payload with every placeholder substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedAction {
    Deploy {
        contract: String,
        args: Vec<Value>,
        from: Address,
        #[serde(with = "crate::types::decimal")]
        value: u128,
    },
    Call {
        to: Address,
        method: String,
        args: Vec<Value>,
        from: Address,
        #[serde(with = "crate::types::decimal")]
        value: u128,
    },
    Parameter {
        value: Value,
    },
    ModuleReference {
        exports: BTreeMap<String, Value>,
    },
}

impl ResolvedAction {
    /// Sending account of on-chain actions.
    pub fn sender(&self) -> Option<Address> {
        match self {
            ResolvedAction::Deploy { from, .. } | ResolvedAction::Call { from, .. } => Some(*from),
            _ => None,
        }
    }

    /// Transaction for on-chain actions, `None` for local ones.
    pub fn to_transaction(&self, nonce: u64) -> Option<TransactionRequest> {
        match self {
            ResolvedAction::Deploy {
                contract,
                args,
                from,
                value,
            } => Some(TransactionRequest {
                from: *from,
                nonce,
                kind: TransactionKind::Deploy {
                    contract: contract.clone(),
                    args: args.clone(),
                },
                value: *value,
            }),
            ResolvedAction::Call {
                to,
                method,
                args,
                from,
                value,
            } => Some(TransactionRequest {
                from: *from,
                nonce,
                kind: TransactionKind::Call {
                    to: *to,
                    method: method.clone(),
                    args: args.clone(),
                },
                value: *value,
            }),
            _ => None,
        }
    }

    /// Result of a local action; on-chain results come from receipts.
    pub fn local_result(&self) -> Option<Value> {
        match self {
            ResolvedAction::Parameter { value } => Some(value.clone()),
            ResolvedAction::ModuleReference { exports } => Some(Value::Map(exports.clone())),
            _ => None,
        }
    }
}

/// Substitute results of completed dependencies into `future`'s payload.
pub fn resolve_action(
    future: &Future,
    results: &BTreeMap<FutureId, Value>,
    accounts: &Accounts,
) -> Result<ResolvedAction, ExecutionError> {
    match &future.payload {
        Payload::Deployment {
            contract,
            args,
            from,
            value,
        } => Ok(ResolvedAction::Deploy {
            contract: contract.clone(),
            args: resolve_args(args, results)?,
            from: accounts.resolve(*from).map_err(ExecutionError::UnknownAccount)?,
            value: *value,
        }),
        Payload::Call {
            target,
            method,
            args,
            from,
            value,
        } => {
            let target_value = results
                .get(target)
                .ok_or_else(|| ExecutionError::MissingResult(target.clone()))?;
            let to = target_value
                .as_address()
                .ok_or_else(|| ExecutionError::InvalidTarget(target_value.display()))?;
            Ok(ResolvedAction::Call {
                to,
                method: method.clone(),
                args: resolve_args(args, results)?,
                from: accounts.resolve(*from).map_err(ExecutionError::UnknownAccount)?,
                value: *value,
            })
        }
        Payload::Parameter(binding) => binding
            .value
            .clone()
            .map(|value| ResolvedAction::Parameter { value })
            .ok_or_else(|| ExecutionError::MissingResult(future.id.clone())),
        Payload::ModuleReference { exports, .. } => {
            let exports = exports
                .iter()
                .map(|(name, id)| {
                    results
                        .get(id)
                        .cloned()
                        .map(|value| (name.clone(), value))
                        .ok_or_else(|| ExecutionError::MissingResult(id.clone()))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(ResolvedAction::ModuleReference { exports })
        }
    }
}

/// Result of a successfully mined on-chain action: the created address for
/// deployments, the decoded output (or empty bytes) for calls.
pub fn receipt_result(action: &ResolvedAction, receipt: &Receipt) -> Result<Value, ExecutionError> {
    match action {
        ResolvedAction::Deploy { .. } => receipt
            .contract_address
            .map(Value::Address)
            .ok_or_else(|| {
                ExecutionError::SubmissionFailed(format!(
                    "receipt {} carries no contract address",
                    receipt.tx_hash
                ))
            }),
        _ => Ok(receipt.output.clone().unwrap_or(Value::Bytes(Vec::new()))),
    }
}

fn resolve_args(
    args: &[crate::future::Argument],
    results: &BTreeMap<FutureId, Value>,
) -> Result<Vec<Value>, ExecutionError> {
    args.iter().map(|arg| arg.resolve(results)).collect()
}
