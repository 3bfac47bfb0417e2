//! In-process chain used by the `simulated` network type and by tests.
//!
//! Transactions are mined instantly on submission. Nonces are strict: a
//! submission with any nonce other than the account's next one is rejected,
//! which makes duplicate or out-of-order sends observable.
//!
//! State can be captured as a [`ChainSnapshot`] and restored later, so a
//! journal written against this chain stays meaningful across processes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::types::Address;

use super::{ChainClient, Receipt, ReceiptStatus, TransactionKind, TransactionRequest, TxHash};

#[derive(Default)]
struct ChainState {
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    contracts: HashMap<Address, String>,
    submissions: Vec<TransactionRequest>,
}

/// Injected misbehaviour, keyed by `Contract` for deployments and
/// `Contract.method` for calls.
#[derive(Default)]
struct Faults {
    revert: HashSet<String>,
    reject: HashSet<String>,
    lose_receipt: HashSet<String>,
    lost: HashSet<TxHash>,
    unavailable: bool,
}

/// Persistent part of a [`SimulatedChain`]. Fault injection and the
/// submission log are per process and not included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain_id: u64,
    nonces: Vec<(Address, u64)>,
    receipts: Vec<Receipt>,
    contracts: Vec<(Address, String)>,
}

pub struct SimulatedChain {
    chain_id: u64,
    state: Mutex<ChainState>,
    faults: Mutex<Faults>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(31337)
    }
}

impl SimulatedChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(ChainState::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Rebuild a chain from a snapshot taken by [`SimulatedChain::snapshot`].
    pub fn from_snapshot(snapshot: ChainSnapshot) -> Self {
        let state = ChainState {
            nonces: snapshot.nonces.into_iter().collect(),
            receipts: snapshot
                .receipts
                .into_iter()
                .map(|receipt| (receipt.tx_hash.clone(), receipt))
                .collect(),
            contracts: snapshot.contracts.into_iter().collect(),
            submissions: Vec::new(),
        };
        debug!(
            chain_id = snapshot.chain_id,
            accounts = state.nonces.len(),
            receipts = state.receipts.len(),
            "simulated chain restored"
        );
        Self {
            chain_id: snapshot.chain_id,
            state: Mutex::new(state),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.state();
        let mut nonces: Vec<(Address, u64)> =
            state.nonces.iter().map(|(a, n)| (*a, *n)).collect();
        nonces.sort_unstable();
        let mut receipts: Vec<Receipt> = state.receipts.values().cloned().collect();
        receipts.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
        let mut contracts: Vec<(Address, String)> = state
            .contracts
            .iter()
            .map(|(a, c)| (*a, c.clone()))
            .collect();
        contracts.sort_unstable();
        ChainSnapshot {
            chain_id: self.chain_id,
            nonces,
            receipts,
            contracts,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Mine transactions matching `key` as reverted.
    pub fn revert_on(&self, key: &str) {
        self.faults().revert.insert(key.to_string());
    }

    /// Refuse submissions matching `key` without consuming a nonce.
    pub fn reject_on(&self, key: &str) {
        self.faults().reject.insert(key.to_string());
    }

    /// Mine transactions matching `key` but fail the confirmation wait, as a
    /// dropped connection would.
    pub fn lose_receipt_on(&self, key: &str) {
        self.faults().lose_receipt.insert(key.to_string());
    }

    /// Make every query fail with [`TransportError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    /// Number of transactions accepted so far.
    pub fn submission_count(&self) -> usize {
        self.state().submissions.len()
    }

    /// Accepted transactions in submission order.
    pub fn submissions(&self) -> Vec<TransactionRequest> {
        self.state().submissions.clone()
    }

    /// Contract name deployed at `address`, if any.
    pub fn contract_at(&self, address: &Address) -> Option<String> {
        self.state().contracts.get(address).cloned()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.faults().unavailable {
            return Err(TransportError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn derive(&self, tag: &str, from: &Address, nonce: u64) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tag.as_bytes());
        hasher.update(&self.chain_id.to_be_bytes());
        hasher.update(from.as_bytes());
        hasher.update(&nonce.to_be_bytes());
        hasher.finalize()
    }
}

fn fault_key(state: &ChainState, kind: &TransactionKind) -> String {
    match kind {
        TransactionKind::Deploy { contract, .. } => contract.clone(),
        TransactionKind::Call { to, method, .. } => {
            let contract = state
                .contracts
                .get(to)
                .cloned()
                .unwrap_or_else(|| to.to_string());
            format!("{contract}.{method}")
        }
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn transaction_count(&self, account: Address) -> Result<u64, TransportError> {
        self.check_available()?;
        Ok(self.state().nonces.get(&account).copied().unwrap_or(0))
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, TransportError> {
        self.check_available()?;
        let mut state = self.state();
        let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce != expected {
            return Err(TransportError::NonceMismatch {
                account: tx.from.to_string(),
                expected,
                actual: tx.nonce,
            });
        }

        let key = fault_key(&state, &tx.kind);
        let mut faults = self.faults();
        if faults.reject.contains(&key) {
            return Err(TransportError::Rejected(format!("{key} refused by node")));
        }

        let hash = TxHash::new(format!(
            "0x{}",
            self.derive("tx", &tx.from, tx.nonce).to_hex()
        ));
        let mut receipt = Receipt {
            tx_hash: hash.clone(),
            status: ReceiptStatus::Success,
            contract_address: None,
            output: None,
        };

        if faults.revert.contains(&key) {
            receipt.status = ReceiptStatus::Reverted {
                reason: format!("{key} reverted"),
            };
        } else {
            match &tx.kind {
                TransactionKind::Deploy { contract, .. } => {
                    let digest = self.derive("create", &tx.from, tx.nonce);
                    let address = Address::from_digest(digest.as_bytes());
                    state.contracts.insert(address, contract.clone());
                    receipt.contract_address = Some(address);
                }
                TransactionKind::Call { to, .. } => {
                    if !state.contracts.contains_key(to) {
                        receipt.status = ReceiptStatus::Reverted {
                            reason: format!("no contract at {to}"),
                        };
                    }
                }
            }
        }

        if faults.lose_receipt.contains(&key) {
            faults.lost.insert(hash.clone());
        }
        drop(faults);

        debug!(tx = hash.as_str(), from = %tx.from, nonce = tx.nonce, "simulated transaction mined");
        state.nonces.insert(tx.from, expected + 1);
        state.receipts.insert(hash.clone(), receipt);
        state.submissions.push(tx);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, TransportError> {
        tokio::task::yield_now().await;
        self.check_available()?;
        if self.faults().lost.contains(hash) {
            return Err(TransportError::Unavailable(format!(
                "connection dropped while waiting for {hash}"
            )));
        }
        trace!(tx = hash.as_str(), "receipt requested");
        self.state()
            .receipts
            .get(hash)
            .cloned()
            .ok_or_else(|| TransportError::UnknownTransaction(hash.to_string()))
    }

    async fn find_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, TransportError> {
        self.check_available()?;
        Ok(self.state().receipts.get(hash).cloned())
    }
}
