//! Write coordinator: staged sub-slice writes.
//!
//! A call scope collects `(path, value)` pairs per slice without touching the
//! slice. Committing folds every staged pair into the latest document in the
//! order received (so the last write to a path wins) and stores the result as
//! one new version. Whatever is still staged when the scope ends is dropped.

use hashbrown::HashMap;
use serde_json::Value as Json;

use crate::error::SliceResult;
use crate::path::{self, Path};
use crate::slice::SliceId;
use crate::value::Value;

/// One pending partial write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrite {
    pub path: Path,
    pub value: Value,
}

impl StagedWrite {
    pub fn new(path: Path, value: Value) -> Self {
        Self { path, value }
    }
}

/// Pending writes of one call scope, keyed by slice.
#[derive(Debug, Default)]
pub struct StagingArea {
    pending: HashMap<SliceId, Vec<StagedWrite>>,
}

impl StagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, id: SliceId, write: StagedWrite) {
        self.pending.entry(id).or_default().push(write);
    }

    /// Remove and return everything staged for `id`, in staging order.
    pub fn take(&mut self, id: &SliceId) -> Vec<StagedWrite> {
        self.pending.remove(id).unwrap_or_default()
    }

    pub fn pending_for(&self, id: &SliceId) -> usize {
        self.pending.get(id).map_or(0, Vec::len)
    }

    /// Total staged writes across all slices.
    pub fn pending(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything; returns how many writes were discarded.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending();
        self.pending.clear();
        dropped
    }
}

/// Fold `writes` into `doc`, first to last.
pub fn merge(doc: &Json, writes: &[StagedWrite]) -> SliceResult<Json> {
    writes
        .iter()
        .try_fold(doc.clone(), |current, write| path::write(&current, &write.path, &write.value))
}
