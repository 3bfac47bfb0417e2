//! Execution journal: durable record of per-future progress.
//!
//! The journal is the only memory shared between runs. Every state change
//! is appended before the run proceeds past it, and a `Completed` entry is
//! final: nothing may be appended for that future afterwards.

pub mod store;
pub mod types;

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use crate::error::JournalError;
use crate::types::{Address, FutureId, Value};

pub use store::{FileJournalStore, JournalStore, MemoryJournalStore};
pub use types::{EntryStatus, JournalRecord};

/// Journal replayed into its current state.
pub struct Journal {
    store: Box<dyn JournalStore>,
    entries: BTreeMap<FutureId, JournalRecord>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Load and replay every record in `store`.
    pub fn open(mut store: impl JournalStore + 'static) -> Result<Self, JournalError> {
        let mut entries: BTreeMap<FutureId, JournalRecord> = BTreeMap::new();
        for (line, record) in store.read_all()? {
            if let Some(existing) = entries.get(&record.future_id)
                && existing.is_completed()
            {
                return Err(JournalError::Corruption {
                    line,
                    detail: format!("record for '{}' after its completion", record.future_id),
                });
            }
            entries.insert(record.future_id.clone(), record);
        }
        debug!(entries = entries.len(), "journal loaded");
        Ok(Self {
            store: Box::new(store),
            entries,
        })
    }

    /// Open an in-memory journal with no history.
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryJournalStore::new()),
            entries: BTreeMap::new(),
        }
    }

    /// Current state per future id.
    pub fn entries(&self) -> &BTreeMap<FutureId, JournalRecord> {
        &self.entries
    }

    pub fn get(&self, id: &FutureId) -> Option<&JournalRecord> {
        self.entries.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark `id` as started with the fingerprint of its resolved inputs.
    /// On-chain futures also record the sending account and nonce.
    pub fn record_start(
        &mut self,
        id: &FutureId,
        fingerprint: &str,
        sender: Option<Address>,
        nonce: Option<u64>,
    ) -> Result<(), JournalError> {
        self.ensure_open(id)?;
        self.append(JournalRecord {
            future_id: id.clone(),
            status: EntryStatus::Pending,
            input_fingerprint: fingerprint.to_string(),
            result: None,
            external_reference: None,
            error: None,
            sender,
            nonce,
            timestamp: Utc::now(),
        })
    }

    /// Attach the transaction reference of a submitted future.
    pub fn record_submitted(&mut self, id: &FutureId, tx_hash: &str) -> Result<(), JournalError> {
        let mut record = self.pending(id)?;
        record.external_reference = Some(tx_hash.to_string());
        record.timestamp = Utc::now();
        self.append(record)
    }

    pub fn record_completion(&mut self, id: &FutureId, result: Value) -> Result<(), JournalError> {
        let mut record = self.pending(id)?;
        record.status = EntryStatus::Completed;
        record.result = Some(result);
        record.error = None;
        record.timestamp = Utc::now();
        self.append(record)
    }

    pub fn record_failure(&mut self, id: &FutureId, error: &str) -> Result<(), JournalError> {
        let mut record = self.pending(id)?;
        record.status = EntryStatus::Failed;
        record.error = Some(error.to_string());
        record.timestamp = Utc::now();
        self.append(record)
    }

    fn ensure_open(&self, id: &FutureId) -> Result<(), JournalError> {
        match self.entries.get(id) {
            Some(entry) if entry.is_completed() => Err(JournalError::AlreadyCompleted(id.clone())),
            _ => Ok(()),
        }
    }

    /// Current entry of `id`, or a blank one if it never started. Fails if
    /// the entry is completed.
    fn pending(&self, id: &FutureId) -> Result<JournalRecord, JournalError> {
        self.ensure_open(id)?;
        match self.entries.get(id) {
            Some(entry) => Ok(entry.clone()),
            None => Ok(JournalRecord {
                future_id: id.clone(),
                status: EntryStatus::Pending,
                input_fingerprint: String::new(),
                result: None,
                external_reference: None,
                error: None,
                sender: None,
                nonce: None,
                timestamp: Utc::now(),
            }),
        }
    }

    fn append(&mut self, record: JournalRecord) -> Result<(), JournalError> {
        self.store.append(&record)?;
        debug!(
            future = record.future_id.as_str(),
            status = ?record.status,
            "journal record appended"
        );
        self.entries.insert(record.future_id.clone(), record);
        Ok(())
    }
}
