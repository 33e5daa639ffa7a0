//! Content store: CID-keyed, reference-counted immutable bytes.
//!
//! Every slice version points at one entry here. Entries are shared between
//! versions (and slices) that carry identical bytes; an entry is deleted the
//! moment its last reference is released.

use alloy_primitives::Bytes;
use hashbrown::HashMap;
use tracing::debug;

use crate::cid::Cid;
use crate::error::{SliceError, SliceResult};

/// One stored blob and the number of history entries pointing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub bytes: Bytes,
    pub refs: u64,
}

/// CID → bytes table with reference counts.
#[derive(Debug, Default, Clone)]
pub struct ContentStore {
    entries: HashMap<Cid, ContentEntry>,
    /// Sum of `bytes.len()` over all entries (each blob counted once)
    stored_bytes: u64,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` and take one reference on it.
    ///
    /// Idempotent on content: putting the same bytes again returns the same
    /// CID and bumps the existing reference count instead of storing a copy.
    pub fn put(&mut self, bytes: &[u8]) -> Cid {
        let cid = Cid::of(bytes);
        match self.entries.get_mut(&cid) {
            Some(entry) => {
                entry.refs += 1;
            }
            None => {
                self.entries.insert(cid, ContentEntry {
                    bytes: Bytes::copy_from_slice(bytes),
                    refs: 1,
                });
                self.stored_bytes += bytes.len() as u64;
                debug!(%cid, size = bytes.len(), "content stored");
            }
        }
        cid
    }

    /// Take one more reference on content that is already stored.
    pub fn retain(&mut self, cid: &Cid) -> SliceResult<()> {
        let entry = self.entries.get_mut(cid).ok_or(SliceError::ContentNotFound(*cid))?;
        entry.refs += 1;
        Ok(())
    }

    /// Fetch the bytes stored under `cid`.
    pub fn get(&self, cid: &Cid) -> SliceResult<Bytes> {
        self.entries
            .get(cid)
            .map(|entry| entry.bytes.clone())
            .ok_or(SliceError::ContentNotFound(*cid))
    }

    /// Drop one reference. Returns `true` when this was the last one and the
    /// content was deleted.
    pub fn release(&mut self, cid: &Cid) -> SliceResult<bool> {
        let entry = self.entries.get_mut(cid).ok_or(SliceError::ContentNotFound(*cid))?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(false);
        }
        if let Some(removed) = self.entries.remove(cid) {
            self.stored_bytes -= removed.bytes.len() as u64;
        }
        debug!(%cid, "content released");
        Ok(true)
    }

    /// Current reference count, 0 when absent.
    pub fn ref_count(&self, cid: &Cid) -> u64 {
        self.entries.get(cid).map_or(0, |entry| entry.refs)
    }

    /// Size in bytes of the content under `cid`.
    pub fn size_of(&self, cid: &Cid) -> SliceResult<u64> {
        self.entries
            .get(cid)
            .map(|entry| entry.bytes.len() as u64)
            .ok_or(SliceError::ContentNotFound(*cid))
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.entries.contains_key(cid)
    }

    /// Number of distinct blobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes held, each distinct blob counted once.
    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes
    }

    /// Sum of all reference counts.
    pub fn total_refs(&self) -> u64 {
        self.entries.values().map(|entry| entry.refs).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Cid, &ContentEntry)> {
        self.entries.iter()
    }

    /// Insert an entry verbatim; used when rebuilding from a snapshot.
    pub(crate) fn insert_entry(&mut self, cid: Cid, entry: ContentEntry) {
        self.stored_bytes += entry.bytes.len() as u64;
        if let Some(old) = self.entries.insert(cid, entry) {
            self.stored_bytes -= old.bytes.len() as u64;
        }
    }
}
