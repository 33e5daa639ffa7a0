//! Call scope: the lifetime of staged sub-slice writes.
//!
//! A `CallScope` is opened per top-level call. Sub-slice writes staged
//! through it are invisible to every other scope and are discarded when the
//! scope is dropped unless a write with `commit == true` flushed them first.
//! Discarded writes leave state untouched and are reported at `warn`.

use tracing::warn;

use crate::cid::Cid;
use crate::context::CallContext;
use crate::engine::SliceEngine;
use crate::error::SliceResult;
use crate::slice::SliceId;
use crate::staging::{StagedWrite, StagingArea};
use crate::value::Value;

pub struct CallScope<'e> {
    engine: &'e SliceEngine,
    ctx: CallContext,
    staging: StagingArea,
}

impl<'e> CallScope<'e> {
    pub(crate) fn new(engine: &'e SliceEngine, ctx: CallContext) -> Self {
        Self { engine, ctx, staging: StagingArea::new() }
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn engine(&self) -> &'e SliceEngine {
        self.engine
    }

    /// Stage `value` at `path` in slice `id`.
    ///
    /// The caller must be a writer of a live slice at staging time. With
    /// `commit == true` every write staged for `id` in this scope, this one
    /// included, is applied and stored as a single new version whose cid is
    /// returned. If the commit fails the staged writes for `id` are gone.
    pub fn write_sub_slice(&mut self, id: &SliceId, path: &str, value: Value, commit: bool) -> SliceResult<Option<Cid>> {
        let path = self.engine.parse_staged_path(path)?;
        self.engine.check_writable(&self.ctx, id)?;
        self.staging.stage(*id, StagedWrite::new(path, value));

        if !commit {
            return Ok(None);
        }
        let writes = self.staging.take(id);
        self.engine.commit_staged(&self.ctx, id, &writes).map(Some)
    }

    /// Writes staged for `id` and not yet committed.
    pub fn pending_for(&self, id: &SliceId) -> usize {
        self.staging.pending_for(id)
    }

    pub fn pending(&self) -> usize {
        self.staging.pending()
    }

    /// End the scope now; returns how many uncommitted writes were dropped.
    pub fn finish(mut self) -> usize {
        self.discard()
    }

    fn discard(&mut self) -> usize {
        let dropped = self.staging.discard();
        if dropped > 0 {
            warn!(caller = %self.ctx.caller, dropped, "call scope ended with uncommitted sub-slice writes");
        }
        dropped
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for CallScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallScope")
            .field("caller", &self.ctx.caller)
            .field("epoch", &self.ctx.epoch)
            .field("pending", &self.staging.pending())
            .finish()
    }
}
