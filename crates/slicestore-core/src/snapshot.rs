//! Snapshot: the persisted state layout.
//!
//! A snapshot holds the slice table, the content table with reference
//! counts, and the id nonce. Staged sub-slice writes are call-scoped and
//! never persisted.
//!
//! Encoded form: FrameHeader (16 bytes) + JSON body
//!
//! ```text
//!   [0..4]   magic:    "SLCS"
//!   [4..8]   version:  u32 LE
//!   [8..12]  length:   u32 LE  - body length in bytes
//!   [12..16] checksum: u32 LE  - CRC32C of body bytes
//! ```
//!
//! Restoring re-derives every cid from its bytes and every reference count
//! from the slice histories, so a snapshot that decodes cleanly but breaks an
//! invariant is still rejected.

use std::fs;
use std::io::Write;
use std::path::Path;

use alloy_primitives::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cid::Cid;
use crate::config::Config;
use crate::content::{ContentEntry, ContentStore};
use crate::engine::{EngineState, SliceEngine};
use crate::error::{SliceError, SliceResult};
use crate::slice::{Slice, SliceRegistry};

/// Magic bytes identifying a snapshot frame: "SLCS"
pub const MAGIC_ARRAY: [u8; 4] = *b"SLCS";

pub const FORMAT_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 16;

/// One row of the content table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub cid: Cid,
    pub bytes: Bytes,
    pub refs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nonce: u64,
    /// Sorted by id
    pub slices: Vec<Slice>,
    /// Sorted by cid
    pub content: Vec<ContentRecord>,
}

impl Snapshot {
    /// Capture the engine's current state.
    pub fn capture(engine: &SliceEngine) -> Self {
        let state = engine.read_state();

        let mut slices: Vec<Slice> = state.registry.iter().cloned().collect();
        slices.sort_by(|a, b| a.id.cmp(&b.id));

        let mut content: Vec<ContentRecord> = state
            .content
            .iter()
            .map(|(cid, entry)| ContentRecord { cid: *cid, bytes: entry.bytes.clone(), refs: entry.refs })
            .collect();
        content.sort_by(|a, b| a.cid.cmp(&b.cid));

        Self { nonce: state.registry.nonce(), slices, content }
    }

    /// Rebuild an engine, verifying every invariant on the way.
    pub fn restore(self, config: Config) -> SliceResult<SliceEngine> {
        config.validate()?;

        let mut content = ContentStore::new();
        for record in self.content {
            if !record.cid.matches(&record.bytes) {
                return Err(SliceError::corrupted(format!("content {} does not hash to its cid", record.cid)));
            }
            if record.bytes.len() > config.max_payload_size {
                return Err(SliceError::CapacityExceeded {
                    what: "payload size",
                    requested: record.bytes.len() as u64,
                    limit: config.max_payload_size as u64,
                });
            }
            if record.refs == 0 {
                return Err(SliceError::corrupted(format!("content {} has no references", record.cid)));
            }
            if content.contains(&record.cid) {
                return Err(SliceError::corrupted(format!("content {} listed twice", record.cid)));
            }
            content.insert_entry(record.cid, ContentEntry { bytes: record.bytes, refs: record.refs });
        }

        let mut expected: HashMap<Cid, u64> = HashMap::new();
        let mut registry = SliceRegistry::with_nonce(self.nonce);
        for slice in self.slices {
            if slice.history.is_empty() {
                return Err(SliceError::corrupted(format!("slice {} has no history", slice.id)));
            }
            if slice.history_depth > config.max_history_depth {
                return Err(SliceError::CapacityExceeded {
                    what: "history depth",
                    requested: slice.history_depth as u64,
                    limit: config.max_history_depth as u64,
                });
            }
            if slice.history.len() > slice.history_depth as usize + 1 {
                return Err(SliceError::corrupted(format!(
                    "slice {} keeps {} versions with depth {}",
                    slice.id,
                    slice.history.len(),
                    slice.history_depth
                )));
            }
            if registry.contains(&slice.id) {
                return Err(SliceError::corrupted(format!("slice {} listed twice", slice.id)));
            }
            for cid in &slice.history {
                *expected.entry(*cid).or_insert(0) += 1;
            }
            registry.insert(slice);
        }

        if expected.len() != content.len() {
            return Err(SliceError::corrupted(format!(
                "{} referenced cids but {} stored",
                expected.len(),
                content.len()
            )));
        }
        for (cid, refs) in &expected {
            let stored = content.ref_count(cid);
            if stored != *refs {
                return Err(SliceError::corrupted(format!(
                    "content {} has {} references, histories hold {}",
                    cid, stored, refs
                )));
            }
        }

        info!(slices = registry.len(), content = content.len(), "snapshot restored");
        Ok(SliceEngine::with_state(config, EngineState { registry, content }))
    }

    /// Encode as header + JSON body.
    pub fn encode(&self) -> SliceResult<Vec<u8>> {
        let body = serde_json::to_vec(self).map_err(|e| SliceError::corrupted(e.to_string()))?;
        let length = u32::try_from(body.len()).map_err(|_| SliceError::CapacityExceeded {
            what: "snapshot size",
            requested: body.len() as u64,
            limit: u32::MAX as u64,
        })?;

        let mut buffer = Vec::with_capacity(HEADER_SIZE + body.len());
        buffer.extend_from_slice(&MAGIC_ARRAY);
        buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buffer.extend_from_slice(&length.to_le_bytes());
        buffer.extend_from_slice(&crc32c::crc32c(&body).to_le_bytes());
        buffer.extend_from_slice(&body);
        Ok(buffer)
    }

    /// Decode and integrity-check a frame produced by [`Snapshot::encode`].
    pub fn decode(data: &[u8]) -> SliceResult<Self> {
        let header = data.get(..HEADER_SIZE).ok_or_else(|| {
            SliceError::corrupted(format!("frame too short: {} bytes, need at least {}", data.len(), HEADER_SIZE))
        })?;

        if header[0..4] != MAGIC_ARRAY {
            return Err(SliceError::corrupted("magic bytes not found"));
        }
        let word = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        let version = word(4);
        let length = word(8) as usize;
        let checksum = word(12);

        if version != FORMAT_VERSION {
            return Err(SliceError::corrupted(format!("unsupported snapshot version {}", version)));
        }
        let body = &data[HEADER_SIZE..];
        if body.len() != length {
            return Err(SliceError::corrupted(format!(
                "body is {} bytes, header says {}",
                body.len(),
                length
            )));
        }
        let actual = crc32c::crc32c(body);
        if actual != checksum {
            return Err(SliceError::corrupted(format!(
                "checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
                checksum, actual
            )));
        }

        serde_json::from_slice(body).map_err(|e| SliceError::corrupted(e.to_string()))
    }

    /// Write to `path` atomically: temp file, sync, rename.
    ///
    /// If the process crashes before the rename the previous snapshot at
    /// `path` is intact and only an orphaned `.tmp` file is left behind.
    pub fn save(&self, path: &Path) -> SliceResult<()> {
        let bytes = self.encode()?;
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| SliceError::io_at(&tmp_path, e))?;
            file.write_all(&bytes).map_err(|e| SliceError::io_at(&tmp_path, e))?;
            file.sync_all().map_err(|e| SliceError::io_at(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, path).map_err(|e| SliceError::io_at(path, e))?;
        info!(path = %path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> SliceResult<Self> {
        let bytes = fs::read(path).map_err(|e| SliceError::io_at(path, e))?;
        Self::decode(&bytes)
    }
}

impl SliceEngine {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self)
    }
}
