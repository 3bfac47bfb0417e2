//! Chain boundary: transaction submission and confirmation.
//!
//! The engine talks to a chain only through [`ChainClient`]. Transport,
//! signing and encoding live behind it; [`SimulatedChain`] is the
//! in-process implementation used by the `simulated` network type.

pub mod signer;
pub mod simulated;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::types::{Address, Value};

pub use signer::{Accounts, Signer, SimulatedSigner};
pub use simulated::{ChainSnapshot, SimulatedChain};

/// Transaction identifier returned by submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deploy {
        contract: String,
        args: Vec<Value>,
    },
    Call {
        to: Address,
        method: String,
        args: Vec<Value>,
    },
}

/// A fully resolved transaction, ready to sign and send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub nonce: u64,
    pub kind: TransactionKind,
    pub value: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    /// Address created by a deployment.
    pub contract_address: Option<Address>,
    /// Decoded return value of a call, when the transport provides one.
    pub output: Option<Value>,
}

/// Transaction submission capability.
///
/// Confirmation waits are bounded by the implementation's own timeout
/// policy; the engine imposes none.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of confirmed transactions sent from `account` (its next nonce).
    async fn transaction_count(&self, account: Address) -> Result<u64, TransportError>;

    /// Send a transaction. Success means the chain accepted it, not that it
    /// was mined.
    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, TransportError>;

    /// Wait until `hash` is mined.
    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, TransportError>;

    /// Look up a receipt without waiting; `None` if the chain has no record
    /// of the transaction.
    async fn find_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, TransportError>;
}
