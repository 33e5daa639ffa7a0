//! Call-scoped transactions over the slice engine.
//!
//! An `ActorTx` is one top-level call. Every method invoked through it shares
//! the caller, epoch and timestamp of the call, and sub-slice writes staged
//! by one invocation are visible to later `writeSubSlice` commits in the same
//! transaction. Dropping the transaction discards whatever is still staged.

use alloy_primitives::U256;
use tracing::{debug, warn};

use slicestore_core::{CallContext, CallScope, SliceEngine, SliceError};

use crate::actor::Revert;
use crate::method::{Method, Output};

pub struct ActorTx<'a> {
    scope: CallScope<'a>,
    calls: usize,
}

impl<'a> ActorTx<'a> {
    /// The payment in `ctx` is not attached to the scope itself; pass it to
    /// [`ActorTx::invoke_paid`] with the method it pays for.
    pub(crate) fn new(engine: &'a SliceEngine, ctx: CallContext) -> Self {
        Self { scope: engine.scope(ctx.with_value(U256::ZERO)), calls: 0 }
    }

    pub fn context(&self) -> &CallContext {
        self.scope.context()
    }

    /// Number of invocations so far, reverted ones included.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Staged sub-slice writes not yet committed.
    pub fn pending(&self) -> usize {
        self.scope.pending()
    }

    /// Invoke `method` with no payment attached.
    pub fn invoke(&mut self, method: Method) -> Result<Output, Revert> {
        self.invoke_paid(method, U256::ZERO)
    }

    /// Invoke `method` with `value` attached. Only payable methods accept a
    /// non-zero value.
    pub fn invoke_paid(&mut self, method: Method, value: U256) -> Result<Output, Revert> {
        self.calls += 1;
        let name = method.name();
        if !value.is_zero() && !method.is_payable() {
            let err = SliceError::InvalidConfig { reason: format!("{} does not accept payment", name) };
            return Err(Revert::new(name, err));
        }

        let ctx = self.scope.context().with_value(value);
        debug!(method = %name, caller = %ctx.caller, epoch = ctx.epoch, "invoke");
        self.dispatch(&ctx, method).map_err(|err| {
            warn!(method = %name, kind = %err.kind(), "call reverted: {}", err);
            Revert::new(name, err)
        })
    }

    fn dispatch(&mut self, ctx: &CallContext, method: Method) -> Result<Output, SliceError> {
        let engine = self.scope.engine();
        let output = match method {
            Method::CreateSlice { owners, writers, history_depth, payload } => {
                Output::Created(engine.create_slice(ctx, &owners, &writers, history_depth, &payload)?)
            }
            Method::FundSlice { id } => Output::Balance(engine.fund_slice(ctx, &id)?),
            Method::AddOwners { id, members } => Output::Changed(engine.add_owners(ctx, &id, &members)?),
            Method::RemoveOwners { id, members } => Output::Changed(engine.remove_owners(ctx, &id, &members)?),
            Method::AddWriters { id, members } => Output::Changed(engine.add_writers(ctx, &id, &members)?),
            Method::RemoveWriters { id, members } => Output::Changed(engine.remove_writers(ctx, &id, &members)?),
            Method::SetHistoryDepth { id, depth } => Output::Evicted(engine.set_history_depth(ctx, &id, depth)?),
            Method::GetSlice { id } => Output::Slice(engine.get_slice(ctx, &id)?),
            Method::GetLatestSliceData { id } => Output::Data(engine.get_latest_slice_data(ctx, &id)?),
            Method::GetCid { cid } => Output::Data(engine.get_cid(&cid)?),
            Method::ParseLatestSlice { id, path, kind } => {
                Output::Value(engine.parse_latest_slice(ctx, &id, &path, kind)?)
            }
            Method::ParseCid { cid, path, kind } => Output::Value(engine.parse_cid(&cid, &path, kind)?),
            Method::WriteSlice { id, payload } => Output::Written(engine.write_slice(ctx, &id, &payload)?),
            Method::WriteSubSlice { id, path, value, commit } => {
                Output::Staged(self.scope.write_sub_slice(&id, &path, value, commit)?)
            }
            Method::PruneSlice { id } => Output::Pruned(engine.prune(ctx, &id)),
        };
        Ok(output)
    }

    /// End the call; returns how many staged writes were discarded.
    pub fn finish(self) -> usize {
        self.scope.finish()
    }
}

impl std::fmt::Debug for ActorTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorTx")
            .field("caller", &self.context().caller)
            .field("calls", &self.calls)
            .field("pending", &self.pending())
            .finish()
    }
}
