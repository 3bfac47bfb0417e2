//! Flat, deduplicated set of futures produced by one composition.

use std::collections::BTreeMap;

use crate::error::BuildError;
use crate::types::FutureId;

use super::types::Future;

/// Futures keyed by their stable id.
///
/// Iteration order is the id order, which keeps plans, fingerprints and
/// reports deterministic across runs.
#[derive(Debug, Clone, Default)]
pub struct FutureRegistry {
    futures: BTreeMap<FutureId, Future>,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a future. Ids are unique within a deployment.
    pub fn insert(&mut self, future: Future) -> Result<(), BuildError> {
        if self.futures.contains_key(&future.id) {
            return Err(BuildError::DuplicateFuture(future.id));
        }
        self.futures.insert(future.id.clone(), future);
        Ok(())
    }

    pub fn get(&self, id: &FutureId) -> Option<&Future> {
        self.futures.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &FutureId) -> Option<&mut Future> {
        self.futures.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &FutureId) -> Option<Future> {
        self.futures.remove(id)
    }

    pub fn contains(&self, id: &FutureId) -> bool {
        self.futures.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Future> {
        self.futures.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &FutureId> {
        self.futures.keys()
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }
}
