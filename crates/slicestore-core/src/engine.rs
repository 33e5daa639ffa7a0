//! Engine facade: the externally visible operation set.
//!
//! SliceEngine owns the slice registry and the content store behind a single
//! RwLock and runs every operation as one critical section: rent is assessed,
//! preconditions are checked, and only then is state touched. A failed
//! operation therefore leaves balances, histories and ACLs exactly as they
//! were.
//!
//! **Read path**: shared lock, rent assessed but not persisted
//! **Write path**: exclusive lock, rent assessed and persisted with the change
//! **Expiry**: fail-closed; reads and writes of a lapsed slice return `Expired`

use std::collections::VecDeque;

use alloy_primitives::{Address, Bytes, U256};
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::cid::Cid;
use crate::config::Config;
use crate::content::ContentStore;
use crate::context::CallContext;
use crate::error::{Role, SliceError, SliceResult};
use crate::path::{self, Path};
use crate::rent::{RentLedger, RentOutcome};
use crate::scope::CallScope;
use crate::slice::{apply_acl, AclOp, AclSet, Slice, SliceId, SliceRegistry, SliceSpec};
use crate::staging::{self, StagedWrite};
use crate::value::{Value, ValueKind};

/// Process-wide state: empty at genesis, never torn down.
#[derive(Debug, Default, Clone)]
pub(crate) struct EngineState {
    pub(crate) registry: SliceRegistry,
    pub(crate) content: ContentStore,
}

/// Returned by `create_slice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub id: SliceId,
    pub cid: Cid,
    /// Epoch at which the attached balance runs out; `None` if never
    pub projected_expiration: Option<u64>,
}

/// Read-only view of a slice, current as of the call epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceInfo {
    pub id: SliceId,
    pub owners: Vec<Address>,
    pub writers: Vec<Address>,
    pub balance: U256,
    pub history_depth: u32,
    /// Oldest first
    pub history: Vec<Cid>,
    pub last_rent_epoch: u64,
    pub projected_expiration: Option<u64>,
    /// Bytes billed per epoch
    pub footprint: u64,
}

impl SliceInfo {
    pub fn latest(&self) -> Option<&Cid> {
        self.history.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub slices: usize,
    pub content_entries: usize,
    pub stored_bytes: u64,
    pub total_refs: u64,
    pub nonce: u64,
}

/// Content-addressed, rent-metered slice store.
///
/// All public methods take `&self`; operations serialize on an internal
/// RwLock, readers concurrently, mutators exclusively.
pub struct SliceEngine {
    state: RwLock<EngineState>,
    ledger: RentLedger,
    config: Config,
}

impl SliceEngine {
    /// Create an empty engine.
    pub fn open(config: Config) -> SliceResult<Self> {
        config.validate()?;
        Ok(Self::with_state(config, EngineState::default()))
    }

    pub(crate) fn with_state(config: Config, state: EngineState) -> Self {
        Self {
            state: RwLock::new(state),
            ledger: RentLedger::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn read_state(&self) -> parking_lot::RwLockReadGuard<'_, EngineState> {
        self.state.read()
    }

    /// Open a call scope for `ctx`. Sub-slice writes staged through the scope
    /// are dropped when it ends unless committed.
    pub fn scope(&self, ctx: CallContext) -> CallScope<'_> {
        CallScope::new(self, ctx)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a slice holding `payload` as its only version, funded with the
    /// payment attached to `ctx`.
    pub fn create_slice(
        &self,
        ctx: &CallContext,
        owners: &[Address],
        writers: &[Address],
        history_depth: u32,
        payload: &[u8],
    ) -> SliceResult<Created> {
        if owners.is_empty() {
            return Err(SliceError::invalid("a slice needs at least one owner"));
        }
        self.check_depth(history_depth)?;
        self.check_payload(payload.len())?;

        let spec = SliceSpec::new(owners.iter().copied(), writers.iter().copied(), history_depth);

        let mut state = self.state.write();
        let EngineState { registry, content } = &mut *state;

        let id = registry.next_id(&ctx.caller, ctx.timestamp, &spec);
        let cid = content.put(payload);
        let slice = Slice {
            id,
            owners: spec.owners,
            writers: spec.writers,
            balance: ctx.value,
            history_depth,
            history: VecDeque::from([cid]),
            last_rent_epoch: ctx.epoch,
        };
        let footprint = self.ledger.footprint(&slice, content)?;
        let projected_expiration = self.ledger.projected_expiration(slice.balance, footprint, ctx.epoch);
        registry.insert(slice);

        info!(slice = %id, %cid, epoch = ctx.epoch, balance = %ctx.value, "slice created");
        Ok(Created { id, cid, projected_expiration })
    }

    /// Credit the attached payment to `id`. Anyone may fund any slice,
    /// including one that has expired but not yet been pruned.
    pub fn fund_slice(&self, ctx: &CallContext, id: &SliceId) -> SliceResult<U256> {
        let mut state = self.state.write();
        let EngineState { registry, content } = &mut *state;

        let slice = registry.get_mut(id)?;
        let footprint = self.ledger.footprint(slice, content)?;
        let outcome = self.ledger.assess(slice, footprint, ctx.epoch);
        outcome.apply(slice);
        slice.balance = slice.balance.saturating_add(ctx.value);

        debug!(slice = %id, amount = %ctx.value, balance = %slice.balance, "slice funded");
        Ok(slice.balance)
    }

    pub fn add_owners(&self, ctx: &CallContext, id: &SliceId, members: &[Address]) -> SliceResult<usize> {
        self.update_acl(ctx, id, AclSet::Owners, AclOp::Add, members)
    }

    /// Removing every owner is allowed; the slice's configuration is then
    /// frozen permanently.
    pub fn remove_owners(&self, ctx: &CallContext, id: &SliceId, members: &[Address]) -> SliceResult<usize> {
        self.update_acl(ctx, id, AclSet::Owners, AclOp::Remove, members)
    }

    pub fn add_writers(&self, ctx: &CallContext, id: &SliceId, members: &[Address]) -> SliceResult<usize> {
        self.update_acl(ctx, id, AclSet::Writers, AclOp::Add, members)
    }

    pub fn remove_writers(&self, ctx: &CallContext, id: &SliceId, members: &[Address]) -> SliceResult<usize> {
        self.update_acl(ctx, id, AclSet::Writers, AclOp::Remove, members)
    }

    fn update_acl(
        &self,
        ctx: &CallContext,
        id: &SliceId,
        set: AclSet,
        op: AclOp,
        members: &[Address],
    ) -> SliceResult<usize> {
        let mut state = self.state.write();
        let outcome = self.assess_live(&state, id, ctx.epoch)?;

        let slice = state.registry.get_mut(id)?;
        slice.require(&ctx.caller, Role::Owner)?;
        outcome.apply(slice);
        let changed = apply_acl(slice, set, op, members);

        debug!(slice = %id, ?set, ?op, changed, "acl updated");
        Ok(changed)
    }

    /// Change how many prior versions are kept. Shrinking evicts the oldest
    /// excess versions immediately; the evicted cids are returned.
    pub fn set_history_depth(&self, ctx: &CallContext, id: &SliceId, depth: u32) -> SliceResult<Vec<Cid>> {
        self.check_depth(depth)?;

        let mut state = self.state.write();
        let outcome = self.assess_live(&state, id, ctx.epoch)?;

        let EngineState { registry, content } = &mut *state;
        let slice = registry.get_mut(id)?;
        slice.require(&ctx.caller, Role::Owner)?;
        outcome.apply(slice);
        slice.history_depth = depth;
        let evicted = slice.trim_history();
        for cid in &evicted {
            content.release(cid)?;
        }

        info!(slice = %id, depth, evicted = evicted.len(), "history depth changed");
        Ok(evicted)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn get_slice(&self, ctx: &CallContext, id: &SliceId) -> SliceResult<SliceInfo> {
        let state = self.state.read();
        let outcome = self.assess_live(&state, id, ctx.epoch)?;
        let slice = state.registry.get(id)?;
        let footprint = self.ledger.footprint(slice, &state.content)?;

        Ok(SliceInfo {
            id: *id,
            owners: slice.owners.iter().copied().collect(),
            writers: slice.writers.iter().copied().collect(),
            balance: outcome.balance,
            history_depth: slice.history_depth,
            history: slice.history.iter().copied().collect(),
            last_rent_epoch: slice.last_rent_epoch,
            projected_expiration: self.ledger.projected_expiration(outcome.balance, footprint, outcome.epoch),
            footprint,
        })
    }

    pub fn get_latest_slice_data(&self, ctx: &CallContext, id: &SliceId) -> SliceResult<Bytes> {
        let state = self.state.read();
        self.assess_live(&state, id, ctx.epoch)?;
        let latest = state.registry.get(id)?.latest();
        state.content.get(&latest)
    }

    /// Content of one retained version, 0 being the oldest.
    pub fn get_slice_version(&self, ctx: &CallContext, id: &SliceId, index: usize) -> SliceResult<Bytes> {
        let state = self.state.read();
        self.assess_live(&state, id, ctx.epoch)?;
        let slice = state.registry.get(id)?;
        let cid = slice.history.get(index).ok_or_else(|| SliceError::IndexOutOfRange {
            path: format!("history[{}]", index),
            index,
            len: slice.history.len(),
        })?;
        state.content.get(cid)
    }

    /// Raw content by cid. Content is only reachable while some slice
    /// history references it.
    pub fn get_cid(&self, cid: &Cid) -> SliceResult<Bytes> {
        self.state.read().content.get(cid)
    }

    /// Typed read at `path` in the latest version of `id`.
    pub fn parse_latest_slice(
        &self,
        ctx: &CallContext,
        id: &SliceId,
        path: &str,
        kind: ValueKind,
    ) -> SliceResult<Value> {
        let path = self.parse_path(path)?;
        let payload = self.get_latest_slice_data(ctx, id)?;
        let doc = path::parse_document(&payload)?;
        path::read(&doc, &path, kind)
    }

    /// Typed read at `path` in the content stored under `cid`.
    pub fn parse_cid(&self, cid: &Cid, path: &str, kind: ValueKind) -> SliceResult<Value> {
        let path = self.parse_path(path)?;
        let payload = self.get_cid(cid)?;
        let doc = path::parse_document(&payload)?;
        path::read(&doc, &path, kind)
    }

    /// Whether `id` has run out of rent as of the call epoch.
    pub fn is_expired(&self, ctx: &CallContext, id: &SliceId) -> SliceResult<bool> {
        let state = self.state.read();
        let slice = state.registry.get(id)?;
        let footprint = self.ledger.footprint(slice, &state.content)?;
        Ok(self.ledger.assess(slice, footprint, ctx.epoch).expired)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            slices: state.registry.len(),
            content_entries: state.content.len(),
            stored_bytes: state.content.stored_bytes(),
            total_refs: state.content.total_refs(),
            nonce: state.registry.nonce(),
        }
    }

    /// Reference count of `cid`, 0 when not stored.
    pub fn ref_count(&self, cid: &Cid) -> u64 {
        self.state.read().content.ref_count(cid)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Replace the content of `id` with `payload` as a new version.
    pub fn write_slice(&self, ctx: &CallContext, id: &SliceId, payload: &[u8]) -> SliceResult<Cid> {
        self.check_payload(payload.len())?;
        let mut state = self.state.write();
        self.write_locked(&mut state, ctx, id, payload)
    }

    /// Fail unless `ctx.caller` could write to `id` right now.
    pub fn check_writable(&self, ctx: &CallContext, id: &SliceId) -> SliceResult<()> {
        let state = self.state.read();
        self.assess_live(&state, id, ctx.epoch)?;
        state.registry.get(id)?.require(&ctx.caller, Role::Writer)
    }

    /// Fold `writes` into the latest document of `id` and store the result as
    /// one new version.
    pub fn commit_staged(&self, ctx: &CallContext, id: &SliceId, writes: &[StagedWrite]) -> SliceResult<Cid> {
        let mut state = self.state.write();
        self.assess_live(&state, id, ctx.epoch)?;
        let latest = {
            let slice = state.registry.get(id)?;
            slice.require(&ctx.caller, Role::Writer)?;
            state.content.get(&slice.latest())?
        };

        let doc = path::parse_document(&latest)?;
        let merged: Json = staging::merge(&doc, writes)?;
        let payload = path::encode_document(&merged)?;
        self.check_payload(payload.len())?;

        debug!(slice = %id, writes = writes.len(), "committing staged writes");
        self.write_locked(&mut state, ctx, id, &payload)
    }

    fn write_locked(&self, state: &mut EngineState, ctx: &CallContext, id: &SliceId, payload: &[u8]) -> SliceResult<Cid> {
        let outcome = self.assess_live(state, id, ctx.epoch)?;

        let EngineState { registry, content } = state;
        let slice = registry.get_mut(id)?;
        slice.require(&ctx.caller, Role::Writer)?;
        outcome.apply(slice);

        // put before release so rewriting an evicted payload keeps its entry
        let cid = content.put(payload);
        let evicted = slice.push_version(cid);
        for old in &evicted {
            content.release(old)?;
        }

        debug!(slice = %id, %cid, evicted = evicted.len(), "slice written");
        Ok(cid)
    }

    // -----------------------------------------------------------------------
    // Pruning
    // -----------------------------------------------------------------------

    /// Remove `id` if it has expired. Returns `false` without touching
    /// anything when the slice is unknown or still funded.
    pub fn prune(&self, ctx: &CallContext, id: &SliceId) -> bool {
        let mut state = self.state.write();
        self.prune_locked(&mut state, id, ctx.epoch)
    }

    /// Prune up to `limit` expired slices in id order; returns the pruned ids.
    pub fn prune_expired(&self, ctx: &CallContext, limit: usize) -> Vec<SliceId> {
        let mut state = self.state.write();
        let mut pruned = Vec::new();
        for id in state.registry.ids() {
            if pruned.len() >= limit {
                break;
            }
            if self.prune_locked(&mut state, &id, ctx.epoch) {
                pruned.push(id);
            }
        }
        pruned
    }

    fn prune_locked(&self, state: &mut EngineState, id: &SliceId, epoch: u64) -> bool {
        let EngineState { registry, content } = state;
        let expired = match registry.get(id) {
            Ok(slice) => match self.ledger.footprint(slice, content) {
                Ok(footprint) => self.ledger.assess(slice, footprint, epoch).expired,
                Err(_) => false,
            },
            Err(_) => false,
        };
        if !expired {
            return false;
        }

        let Some(slice) = registry.remove(id) else {
            return false;
        };
        let mut released = 0usize;
        for cid in &slice.history {
            if let Ok(true) = content.release(cid) {
                released += 1;
            }
        }

        info!(slice = %id, epoch, versions = slice.history.len(), released, "slice pruned");
        true
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Assess rent for `id` at `epoch`, failing if the slice is missing or
    /// expired. Nothing is persisted.
    fn assess_live(&self, state: &EngineState, id: &SliceId, epoch: u64) -> SliceResult<RentOutcome> {
        let slice = state.registry.get(id)?;
        let footprint = self.ledger.footprint(slice, &state.content)?;
        let outcome = self.ledger.assess(slice, footprint, epoch);
        if outcome.expired {
            return Err(SliceError::Expired { id: *id, epoch });
        }
        Ok(outcome)
    }

    fn parse_path(&self, path: &str) -> SliceResult<Path> {
        Path::parse_bounded(path, self.config.max_path_segments)
    }

    pub(crate) fn parse_staged_path(&self, path: &str) -> SliceResult<Path> {
        self.parse_path(path)
    }

    fn check_depth(&self, depth: u32) -> SliceResult<()> {
        if depth > self.config.max_history_depth {
            return Err(SliceError::CapacityExceeded {
                what: "history depth",
                requested: depth as u64,
                limit: self.config.max_history_depth as u64,
            });
        }
        Ok(())
    }

    fn check_payload(&self, len: usize) -> SliceResult<()> {
        if len > self.config.max_payload_size {
            return Err(SliceError::CapacityExceeded {
                what: "payload size",
                requested: len as u64,
                limit: self.config.max_payload_size as u64,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SliceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("SliceEngine")
            .field("slices", &stats.slices)
            .field("content_entries", &stats.content_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::error::ErrorKind;
    use crate::value::ScalarKind;

    fn owner() -> Address {
        Address::repeat_byte(0x0A)
    }

    fn writer() -> Address {
        Address::repeat_byte(0x0B)
    }

    fn stranger() -> Address {
        Address::repeat_byte(0x0C)
    }

    fn test_engine() -> SliceEngine {
        SliceEngine::open(Config::devnet()).unwrap()
    }

    fn funded(caller: Address, epoch: u64) -> CallContext {
        CallContext::new(caller, epoch).with_value(U256::from(1_000_000u64))
    }

    /// A funded slice owned by `owner()` and writable by `writer()`.
    fn test_slice(engine: &SliceEngine, depth: u32, payload: &[u8]) -> SliceId {
        engine
            .create_slice(&funded(owner(), 1), &[owner()], &[writer()], depth, payload)
            .unwrap()
            .id
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let mut config = Config::devnet();
        config.max_payload_size = 0;
        assert_eq!(SliceEngine::open(config).unwrap_err().kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_create_without_owner_fails() {
        let engine = test_engine();
        let err = engine.create_slice(&funded(owner(), 1), &[], &[writer()], 0, b"{}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(engine.stats().slices, 0);
        assert_eq!(engine.stats().content_entries, 0);
    }

    #[test]
    fn test_create_and_read_back() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 5).with_value(U256::from(100u64));
        let created = engine.create_slice(&ctx, &[owner()], &[writer()], 2, b"0123456789").unwrap();

        assert_eq!(created.cid, Cid::of(b"0123456789"));
        // 10 bytes at rate 1 with no overhead drains 100 in 10 epochs
        assert_eq!(created.projected_expiration, Some(15));

        let info = engine.get_slice(&ctx, &created.id).unwrap();
        assert_eq!(info.owners, vec![owner()]);
        assert_eq!(info.writers, vec![writer()]);
        assert_eq!(info.history, vec![created.cid]);
        assert_eq!(info.latest(), Some(&created.cid));
        assert_eq!(info.footprint, 10);
        assert_eq!(engine.get_latest_slice_data(&ctx, &created.id).unwrap().to_vec(), b"0123456789");
        assert_eq!(engine.ref_count(&created.cid), 1);
    }

    #[test]
    fn test_identical_creates_get_distinct_ids() {
        let engine = test_engine();
        let ctx = funded(owner(), 1);
        let a = engine.create_slice(&ctx, &[owner()], &[], 0, b"same").unwrap();
        let b = engine.create_slice(&ctx, &[owner()], &[], 0, b"same").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.cid, b.cid);
        assert_eq!(engine.ref_count(&a.cid), 2);
        assert_eq!(engine.stats().content_entries, 1);
    }

    #[test]
    fn test_depth_zero_keeps_only_latest() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"first");
        let ctx = funded(writer(), 1);
        let first = Cid::of(b"first");

        let second = engine.write_slice(&ctx, &id, b"second").unwrap();

        let info = engine.get_slice(&ctx, &id).unwrap();
        assert_eq!(info.history, vec![second]);
        assert_eq!(engine.ref_count(&first), 0);
        assert_eq!(engine.get_cid(&first).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_rewriting_same_payload_keeps_content() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"same");
        let cid = engine.write_slice(&funded(writer(), 1), &id, b"same").unwrap();
        assert_eq!(cid, Cid::of(b"same"));
        assert_eq!(engine.ref_count(&cid), 1);
        assert_eq!(engine.get_cid(&cid).unwrap().to_vec(), b"same");
    }

    #[test]
    fn test_history_grows_to_depth_then_slides() {
        let engine = test_engine();
        let id = test_slice(&engine, 2, b"v0");
        let ctx = funded(writer(), 1);
        for v in [b"v1", b"v2", b"v3"] {
            engine.write_slice(&ctx, &id, v).unwrap();
        }

        let info = engine.get_slice(&ctx, &id).unwrap();
        assert_eq!(info.history, vec![Cid::of(b"v1"), Cid::of(b"v2"), Cid::of(b"v3")]);
        assert_eq!(engine.get_slice_version(&ctx, &id, 0).unwrap().to_vec(), b"v1");
        let err = engine.get_slice_version(&ctx, &id, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn test_owner_is_not_implicitly_writer() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"v0");
        let err = engine.write_slice(&funded(owner(), 1), &id, b"v1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(engine.get_slice(&funded(owner(), 1), &id).unwrap().history.len(), 1);
    }

    #[test]
    fn test_removing_sole_owner_freezes_config() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"v0");
        let ctx = funded(owner(), 1);

        assert_eq!(engine.remove_owners(&ctx, &id, &[owner()]).unwrap(), 1);
        let err = engine.add_writers(&ctx, &id, &[stranger()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(engine.get_slice(&ctx, &id).unwrap().owners.is_empty());

        // writers are unaffected
        engine.write_slice(&funded(writer(), 1), &id, b"v1").unwrap();
    }

    #[test]
    fn test_acl_updates() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"v0");
        let ctx = funded(owner(), 1);

        assert_eq!(engine.add_writers(&ctx, &id, &[stranger(), stranger()]).unwrap(), 1);
        engine.write_slice(&funded(stranger(), 1), &id, b"v1").unwrap();
        assert_eq!(engine.remove_writers(&ctx, &id, &[stranger()]).unwrap(), 1);
        assert!(engine.write_slice(&funded(stranger(), 1), &id, b"v2").is_err());

        assert_eq!(engine.add_owners(&ctx, &id, &[writer()]).unwrap(), 1);
        let err = engine.add_owners(&funded(stranger(), 1), &id, &[stranger()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_unfunded_slice_expires_and_revives() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 1);
        let id = engine.create_slice(&ctx, &[owner()], &[writer()], 0, b"v0").unwrap().id;

        let later = CallContext::new(writer(), 2);
        assert!(engine.is_expired(&later, &id).unwrap());
        assert_eq!(engine.get_latest_slice_data(&later, &id).unwrap_err().kind(), ErrorKind::Expired);
        assert_eq!(engine.write_slice(&later, &id, b"v1").unwrap_err().kind(), ErrorKind::Expired);

        let balance = engine.fund_slice(&later.with_value(U256::from(1_000u64)), &id).unwrap();
        assert_eq!(balance, U256::from(1_000u64));
        assert!(!engine.is_expired(&later, &id).unwrap());
        assert_eq!(engine.get_latest_slice_data(&later, &id).unwrap().to_vec(), b"v0");
    }

    #[test]
    fn test_rent_drains_balance() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 0).with_value(U256::from(100u64));
        let id = engine.create_slice(&ctx, &[owner()], &[writer()], 0, b"0123456789").unwrap().id;

        let info = engine.get_slice(&ctx.at_epoch(3), &id).unwrap();
        assert_eq!(info.balance, U256::from(70u64));
        // reads do not persist the assessment
        assert_eq!(info.last_rent_epoch, 0);

        engine.add_writers(&ctx.at_epoch(3), &id, &[stranger()]).unwrap();
        let info = engine.get_slice(&ctx.at_epoch(3), &id).unwrap();
        assert_eq!(info.last_rent_epoch, 3);
        assert_eq!(info.balance, U256::from(70u64));

        assert!(engine.is_expired(&ctx.at_epoch(10), &id).unwrap());
        assert!(!engine.is_expired(&ctx.at_epoch(9), &id).unwrap());
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 0).with_value(U256::from(100u64));
        let id = engine.create_slice(&ctx, &[owner()], &[writer()], 0, b"0123456789").unwrap().id;
        let before = engine.stats();

        let huge = vec![0u8; Config::devnet().max_payload_size + 1];
        let err = engine.write_slice(&CallContext::new(writer(), 4), &id, &huge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        let err = engine.write_slice(&CallContext::new(stranger(), 4), &id, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        assert_eq!(engine.stats(), before);
        let info = engine.get_slice(&ctx, &id).unwrap();
        assert_eq!(info.last_rent_epoch, 0);
        assert_eq!(info.balance, U256::from(100u64));
    }

    #[test]
    fn test_unknown_slice() {
        let engine = test_engine();
        let ctx = funded(owner(), 1);
        let missing = SliceId::repeat_byte(0xEE);
        assert_eq!(engine.get_slice(&ctx, &missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.fund_slice(&ctx, &missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.write_slice(&ctx, &missing, b"x").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_history_depth_limits() {
        let engine = test_engine();
        let max = Config::devnet().max_history_depth;
        let err = engine
            .create_slice(&funded(owner(), 1), &[owner()], &[], max + 1, b"")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

        let id = test_slice(&engine, max, b"v0");
        let err = engine.set_history_depth(&funded(owner(), 1), &id, max + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    }

    #[test]
    fn test_shrinking_depth_evicts_immediately() {
        let engine = test_engine();
        let id = test_slice(&engine, 3, b"v0");
        let ctx = funded(writer(), 1);
        for v in [b"v1", b"v2", b"v3"] {
            engine.write_slice(&ctx, &id, v).unwrap();
        }

        let err = engine.set_history_depth(&ctx, &id, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let evicted = engine.set_history_depth(&funded(owner(), 1), &id, 1).unwrap();
        assert_eq!(evicted, vec![Cid::of(b"v0"), Cid::of(b"v1")]);
        assert_eq!(engine.ref_count(&Cid::of(b"v0")), 0);

        let info = engine.get_slice(&ctx, &id).unwrap();
        assert_eq!(info.history, vec![Cid::of(b"v2"), Cid::of(b"v3")]);
        assert_eq!(info.history_depth, 1);
    }

    #[test]
    fn test_parse_latest_slice() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, br#"{"hero":{"weight":180,"items":["rope","lamp"]}}"#);
        let ctx = funded(stranger(), 1);

        let weight = engine.parse_latest_slice(&ctx, &id, "hero.weight", ValueKind::scalar(ScalarKind::Uint256)).unwrap();
        assert_eq!(weight.as_uint(), Some(U256::from(180u64)));

        let item = engine.parse_latest_slice(&ctx, &id, "hero.items[1]", ValueKind::scalar(ScalarKind::String)).unwrap();
        assert_eq!(item.as_str(), Some("lamp"));

        let err = engine
            .parse_latest_slice(&ctx, &id, "hero.height", ValueKind::scalar(ScalarKind::Uint256))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathNotFound);

        let cid = Cid::of(br#"{"hero":{"weight":180,"items":["rope","lamp"]}}"#);
        let items = engine.parse_cid(&cid, "hero.items", ValueKind::array(ScalarKind::String)).unwrap();
        assert_eq!(items.to_json(), serde_json::json!(["rope", "lamp"]));
    }

    #[test]
    fn test_parse_malformed_payload() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"not json");
        let err = engine
            .parse_latest_slice(&funded(owner(), 1), &id, "a", ValueKind::scalar(ScalarKind::String))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDocument);
    }

    #[test]
    fn test_sub_slice_writes_commit_together() {
        let engine = test_engine();
        let id = test_slice(&engine, 1, br#"{"hero":{"weight":180}}"#);
        let ctx = funded(writer(), 1);

        let mut scope = engine.scope(ctx);
        assert_eq!(scope.write_sub_slice(&id, "hero.weight", Value::uint(U256::from(200u64)), false).unwrap(), None);
        assert_eq!(scope.pending_for(&id), 1);
        // staged writes are invisible until committed
        assert_eq!(
            engine.get_latest_slice_data(&ctx, &id).unwrap().to_vec(),
            br#"{"hero":{"weight":180}}"#
        );

        let cid = scope.write_sub_slice(&id, "hero.name", Value::string("ramona"), true).unwrap().unwrap();
        assert_eq!(scope.pending(), 0);
        drop(scope);

        let latest = engine.get_latest_slice_data(&ctx, &id).unwrap();
        assert_eq!(latest.to_vec(), br#"{"hero":{"name":"ramona","weight":200}}"#);
        assert_eq!(Cid::of(&latest), cid);
        assert_eq!(engine.get_slice(&ctx, &id).unwrap().history.len(), 2);
    }

    #[test]
    fn test_uncommitted_sub_slice_writes_are_discarded() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, br#"{"a":1}"#);
        let ctx = funded(writer(), 1);

        let mut scope = engine.scope(ctx);
        scope.write_sub_slice(&id, "a", Value::uint(U256::from(2u64)), false).unwrap();
        scope.write_sub_slice(&id, "b", Value::uint(U256::from(3u64)), false).unwrap();
        assert_eq!(scope.finish(), 2);

        // a fresh scope does not see them
        let mut scope = engine.scope(ctx);
        assert_eq!(scope.pending(), 0);
        scope.write_sub_slice(&id, "c", Value::uint(U256::from(4u64)), true).unwrap();
        drop(scope);

        assert_eq!(engine.get_latest_slice_data(&ctx, &id).unwrap().to_vec(), br#"{"a":1,"c":4}"#);
    }

    #[test]
    fn test_sub_slice_write_requires_writer() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, b"{}");
        let mut scope = engine.scope(funded(stranger(), 1));
        let err = scope.write_sub_slice(&id, "a", Value::string("x"), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(scope.pending(), 0);
    }

    #[test]
    fn test_failed_commit_drops_staged_writes() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, br#"{"list":[1]}"#);
        let ctx = funded(writer(), 1);

        let mut scope = engine.scope(ctx);
        scope.write_sub_slice(&id, "other", Value::uint(U256::from(1u64)), false).unwrap();
        let err = scope.write_sub_slice(&id, "list[5]", Value::uint(U256::from(1u64)), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(scope.pending(), 0);
        drop(scope);

        assert_eq!(engine.get_latest_slice_data(&ctx, &id).unwrap().to_vec(), br#"{"list":[1]}"#);
    }

    #[test]
    fn test_prune() {
        let engine = test_engine();
        let live = test_slice(&engine, 0, b"live");
        let ctx = CallContext::new(owner(), 1);
        let dead = engine.create_slice(&ctx, &[owner()], &[], 0, b"dead").unwrap().id;

        assert!(!engine.prune(&ctx, &live));
        assert!(!engine.prune(&ctx, &SliceId::repeat_byte(0xEE)));
        assert!(engine.prune(&ctx, &dead));
        assert!(!engine.prune(&ctx, &dead));

        assert_eq!(engine.ref_count(&Cid::of(b"dead")), 0);
        assert_eq!(engine.get_slice(&ctx, &dead).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.stats().slices, 1);
        assert_eq!(engine.get_latest_slice_data(&ctx, &live).unwrap().to_vec(), b"live");
    }

    #[test]
    fn test_prune_keeps_shared_content() {
        let engine = test_engine();
        let live = test_slice(&engine, 0, b"shared");
        let ctx = CallContext::new(owner(), 1);
        let dead = engine.create_slice(&ctx, &[owner()], &[], 0, b"shared").unwrap().id;

        assert!(engine.prune(&ctx, &dead));
        assert_eq!(engine.ref_count(&Cid::of(b"shared")), 1);
        assert_eq!(engine.get_latest_slice_data(&ctx, &live).unwrap().to_vec(), b"shared");
    }

    #[test]
    fn test_prune_expired_respects_limit() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 1);
        for i in 0..5u8 {
            engine.create_slice(&ctx, &[owner()], &[], 0, &[i]).unwrap();
        }
        test_slice(&engine, 0, b"live");

        assert_eq!(engine.prune_expired(&ctx, 3).len(), 3);
        assert_eq!(engine.prune_expired(&ctx, 10).len(), 2);
        assert!(engine.prune_expired(&ctx, 10).is_empty());
        assert_eq!(engine.stats().slices, 1);
        assert_eq!(engine.stats().content_entries, 1);
    }

    #[test]
    fn test_concurrent_reads() {
        let engine = Arc::new(test_engine());
        let ids: Vec<SliceId> = (0..20u8).map(|i| test_slice(&engine, 0, &[i])).collect();
        let ids = Arc::new(ids);

        let mut handles = vec![];
        for _ in 0..8 {
            let e = Arc::clone(&engine);
            let ids = Arc::clone(&ids);
            handles.push(std::thread::spawn(move || {
                let ctx = funded(stranger(), 1);
                for (i, id) in ids.iter().enumerate() {
                    let data = e.get_latest_slice_data(&ctx, id).unwrap();
                    assert_eq!(data.to_vec(), &[i as u8]);
                }
            }));
        }
        for h in handles { h.join().unwrap(); }
    }

    #[test]
    fn test_expired_slice_rejects_every_access() {
        let engine = test_engine();
        let ctx = CallContext::new(owner(), 1);
        let id = engine.create_slice(&ctx, &[owner()], &[writer()], 0, br#"{"a":1}"#).unwrap().id;
        let later = ctx.at_epoch(2);
        let kind = ValueKind::scalar(ScalarKind::Uint256);

        assert_eq!(engine.get_slice(&later, &id).unwrap_err().kind(), ErrorKind::Expired);
        assert_eq!(engine.parse_latest_slice(&later, &id, "a", kind).unwrap_err().kind(), ErrorKind::Expired);
        assert_eq!(engine.remove_owners(&later, &id, &[owner()]).unwrap_err().kind(), ErrorKind::Expired);
        assert_eq!(engine.remove_writers(&later, &id, &[writer()]).unwrap_err().kind(), ErrorKind::Expired);

        let mut scope = engine.scope(CallContext::new(writer(), 2));
        let err = scope.write_sub_slice(&id, "a", Value::uint(U256::from(2u64)), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(scope.pending(), 0);
        drop(scope);

        // nothing changed: funding revives the untouched slice
        engine.fund_slice(&later.with_value(U256::from(1_000u64)), &id).unwrap();
        let info = engine.get_slice(&later, &id).unwrap();
        assert_eq!(info.owners, vec![owner()]);
        assert_eq!(info.writers, vec![writer()]);
    }

    #[test]
    fn test_wide_integers_survive_reads_and_partial_writes() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, br#"{"big":123456789012345678901234567890,"a":1}"#);
        let ctx = funded(writer(), 1);
        let wide = U256::from_str_radix("123456789012345678901234567890", 10).unwrap();

        let big = engine.parse_latest_slice(&ctx, &id, "big", ValueKind::scalar(ScalarKind::Uint256)).unwrap();
        assert_eq!(big.as_uint(), Some(wide));

        let mut scope = engine.scope(ctx);
        scope.write_sub_slice(&id, "a", Value::uint(U256::from(2u64)), true).unwrap();
        drop(scope);

        assert_eq!(
            engine.get_latest_slice_data(&ctx, &id).unwrap().to_vec(),
            br#"{"a":2,"big":123456789012345678901234567890}"#
        );
        let big = engine.parse_latest_slice(&ctx, &id, "big", ValueKind::scalar(ScalarKind::Uint256)).unwrap();
        assert_eq!(big.as_uint(), Some(wide));
    }

    #[test]
    fn test_address_does_not_read_as_uint() {
        let engine = test_engine();
        let id = test_slice(&engine, 0, br#"{"xs":[1,"0xff"]}"#);
        let ctx = funded(writer(), 1);

        let mut scope = engine.scope(ctx);
        scope.write_sub_slice(&id, "who", Value::address(Address::repeat_byte(0x0b)), true).unwrap();
        drop(scope);

        let err = engine
            .parse_latest_slice(&ctx, &id, "who", ValueKind::scalar(ScalarKind::Uint256))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        let who = engine.parse_latest_slice(&ctx, &id, "who", ValueKind::scalar(ScalarKind::Address)).unwrap();
        assert_eq!(who, Value::address(Address::repeat_byte(0x0b)));

        let err = engine
            .parse_latest_slice(&ctx, &id, "xs", ValueKind::array(ScalarKind::Uint256))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_timestamp_feeds_slice_id() {
        let create = |timestamp: u64| {
            let engine = test_engine();
            let ctx = funded(owner(), 1).with_timestamp(timestamp);
            engine.create_slice(&ctx, &[owner()], &[], 0, b"").unwrap().id
        };
        assert_eq!(create(100), create(100));
        assert_ne!(create(100), create(101));
    }

    proptest! {
        #[test]
        fn history_stays_bounded(depth in 0u32..=8, payloads in proptest::collection::vec(0u8..6, 0..24)) {
            let engine = test_engine();
            let id = test_slice(&engine, depth, b"genesis");
            let ctx = funded(writer(), 1);
            for p in &payloads {
                engine.write_slice(&ctx, &id, &[*p]).unwrap();
            }

            let info = engine.get_slice(&ctx, &id).unwrap();
            let expected = (payloads.len() + 1).min(depth as usize + 1);
            prop_assert_eq!(info.history.len(), expected);
            prop_assert_eq!(engine.stats().total_refs, expected as u64);
            for cid in &info.history {
                prop_assert!(engine.get_cid(cid).is_ok());
            }
        }
    }
}
