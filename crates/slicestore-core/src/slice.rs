//! Slice registry: record identity, access control and history chains.
//!
//! A slice owns two independent identity sets. Owners configure the slice
//! (ACLs, history depth); writers replace its content. Neither implies the
//! other. Removing the last owner is allowed and freezes the configuration
//! for good.
//!
//! History is kept oldest-first: `history[0]` is the oldest retained version
//! and `history.last()` the current one.

use std::collections::{BTreeSet, VecDeque};

use alloy_primitives::{keccak256, Address, B256, U256};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::cid::Cid;
use crate::error::{Role, SliceError, SliceResult};

/// Slice identifier.
pub type SliceId = B256;

/// A logical, versioned, access-controlled, rent-funded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub id: SliceId,
    pub owners: BTreeSet<Address>,
    pub writers: BTreeSet<Address>,
    pub balance: U256,
    /// Number of prior versions retained beyond the latest
    pub history_depth: u32,
    /// Content versions, oldest first; never empty
    pub history: VecDeque<Cid>,
    pub last_rent_epoch: u64,
}

impl Slice {
    pub fn latest(&self) -> Cid {
        // history is non-empty from creation onward
        self.history[self.history.len() - 1]
    }

    pub fn is_owner(&self, who: &Address) -> bool {
        self.owners.contains(who)
    }

    pub fn is_writer(&self, who: &Address) -> bool {
        self.writers.contains(who)
    }

    /// Fail with `Unauthorized` unless `caller` holds `role`.
    pub fn require(&self, caller: &Address, role: Role) -> SliceResult<()> {
        let allowed = match role {
            Role::Owner => self.is_owner(caller),
            Role::Writer => self.is_writer(caller),
        };
        if allowed {
            Ok(())
        } else {
            Err(SliceError::Unauthorized { id: self.id, caller: *caller, role })
        }
    }

    /// Append `cid` as the newest version and return the versions that fell
    /// off the old end. The caller releases them from the content store.
    pub fn push_version(&mut self, cid: Cid) -> Vec<Cid> {
        self.history.push_back(cid);
        self.trim_history()
    }

    /// Drop the oldest versions until `history_depth + 1` remain.
    pub fn trim_history(&mut self) -> Vec<Cid> {
        let keep = self.history_depth as usize + 1;
        let excess = self.history.len().saturating_sub(keep);
        self.history.drain(..excess).collect()
    }
}

/// Parameters of a new slice, hashed into its id.
#[derive(Debug, Clone)]
pub struct SliceSpec {
    pub owners: BTreeSet<Address>,
    pub writers: BTreeSet<Address>,
    pub history_depth: u32,
}

impl SliceSpec {
    pub fn new(
        owners: impl IntoIterator<Item = Address>,
        writers: impl IntoIterator<Item = Address>,
        history_depth: u32,
    ) -> Self {
        Self {
            owners: owners.into_iter().collect(),
            writers: writers.into_iter().collect(),
            history_depth,
        }
    }

    /// keccak256(owners ‖ writers ‖ history_depth), sets in sorted order.
    pub fn config_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(20 * (self.owners.len() + self.writers.len()) + 4);
        for owner in &self.owners {
            buf.extend_from_slice(owner.as_slice());
        }
        for writer in &self.writers {
            buf.extend_from_slice(writer.as_slice());
        }
        buf.extend_from_slice(&self.history_depth.to_be_bytes());
        keccak256(&buf)
    }
}

/// Id-keyed slice table plus the nonce that keeps ids unique.
#[derive(Debug, Default, Clone)]
pub struct SliceRegistry {
    slices: HashMap<SliceId, Slice>,
    /// Monotonic across creates and never rewound by pruning
    nonce: u64,
}

impl SliceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_nonce(nonce: u64) -> Self {
        Self { slices: HashMap::new(), nonce }
    }

    /// Derive a fresh id for `caller` creating `spec` at `timestamp`.
    ///
    /// id = keccak256(caller ‖ nonce ‖ timestamp ‖ config_hash). The nonce is
    /// consumed even when the derived id turns out to be live already.
    pub fn next_id(&mut self, caller: &Address, timestamp: u64, spec: &SliceSpec) -> SliceId {
        let config_hash = spec.config_hash();
        loop {
            let mut buf = [0u8; 20 + 8 + 8 + 32];
            buf[..20].copy_from_slice(caller.as_slice());
            buf[20..28].copy_from_slice(&self.nonce.to_be_bytes());
            buf[28..36].copy_from_slice(&timestamp.to_be_bytes());
            buf[36..].copy_from_slice(config_hash.as_slice());
            self.nonce += 1;

            let id = keccak256(buf);
            if !self.slices.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn insert(&mut self, slice: Slice) {
        self.slices.insert(slice.id, slice);
    }

    pub fn get(&self, id: &SliceId) -> SliceResult<&Slice> {
        self.slices.get(id).ok_or(SliceError::SliceNotFound(*id))
    }

    pub fn get_mut(&mut self, id: &SliceId) -> SliceResult<&mut Slice> {
        self.slices.get_mut(id).ok_or(SliceError::SliceNotFound(*id))
    }

    pub fn remove(&mut self, id: &SliceId) -> Option<Slice> {
        self.slices.remove(id)
    }

    pub fn contains(&self, id: &SliceId) -> bool {
        self.slices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<SliceId> {
        let mut ids: Vec<SliceId> = self.slices.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.slices.values()
    }
}

/// Which identity set an ACL update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclSet {
    Owners,
    Writers,
}

/// Union or difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclOp {
    Add,
    Remove,
}

/// Apply an ACL update. Duplicates and absent removals are ignored.
/// Returns how many members actually changed.
pub fn apply_acl(slice: &mut Slice, set: AclSet, op: AclOp, members: &[Address]) -> usize {
    let target = match set {
        AclSet::Owners => &mut slice.owners,
        AclSet::Writers => &mut slice.writers,
    };
    members
        .iter()
        .filter(|member| match op {
            AclOp::Add => target.insert(**member),
            AclOp::Remove => target.remove(*member),
        })
        .count()
}
