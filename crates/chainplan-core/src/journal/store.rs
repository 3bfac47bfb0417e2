//! Journal persistence backends.
//!
//! [`FileJournalStore`] keeps one JSON record per line and syncs after every
//! append; a record is durable once `append` returns. A trailing partial
//! line left by a crash mid-write is dropped on open.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::JournalError;

use super::types::JournalRecord;

/// Append-only record storage.
pub trait JournalStore: Send {
    /// Every record in write order, paired with its 1-based line number.
    fn read_all(&mut self) -> Result<Vec<(usize, JournalRecord)>, JournalError>;

    /// Durably append one record.
    fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError>;
}

/// JSON-lines journal on disk.
#[derive(Debug)]
pub struct FileJournalStore {
    path: PathBuf,
    file: File,
}

impl FileJournalStore {
    /// Open (or create) the journal at `path`, repairing a truncated tail.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(io_err)?;
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            let keep = contents
                .iter()
                .rposition(|b| *b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(0);
            let tail = &contents[keep..];
            if serde_json::from_slice::<JournalRecord>(tail).is_ok() {
                file.write_all(b"\n").map_err(io_err)?;
            } else {
                warn!(
                    path = %path.display(),
                    bytes = tail.len(),
                    "dropping truncated journal record"
                );
                file.set_len(keep as u64).map_err(io_err)?;
            }
            file.sync_all().map_err(io_err)?;
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalStore for FileJournalStore {
    fn read_all(&mut self) -> Result<Vec<(usize, JournalRecord)>, JournalError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| JournalError::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_lines(&contents)
    }

    fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let io_err = |source| JournalError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(&line).map_err(io_err)?;
        self.file.sync_data().map_err(io_err)
    }
}

fn parse_lines(contents: &str) -> Result<Vec<(usize, JournalRecord)>, JournalError> {
    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| JournalError::Corruption {
            line: index + 1,
            detail: e.to_string(),
        })?;
        records.push((index + 1, record));
    }
    Ok(records)
}

/// In-memory journal. Clones share the same records, so a test can keep a
/// handle and inspect what a run wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournalStore {
    records: Arc<Mutex<Vec<JournalRecord>>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<JournalRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl JournalStore for MemoryJournalStore {
    fn read_all(&mut self) -> Result<Vec<(usize, JournalRecord)>, JournalError> {
        Ok(self
            .records()
            .into_iter()
            .enumerate()
            .map(|(i, r)| (i + 1, r))
            .collect())
    }

    fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record.clone());
        Ok(())
    }
}
