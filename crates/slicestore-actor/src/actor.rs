//! Storage actor: the slice engine behind the host-facing method surface.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use slicestore_core::{CallContext, Config, ErrorKind, SliceEngine, SliceError, SliceResult, Snapshot};

use crate::method::{Method, Output};
use crate::tx::ActorTx;

/// A failed call, as reported to the host.
///
/// Every failure aborts the call with no state change; the host only sees
/// which method failed, the error class and a readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{method} reverted: {kind}: {reason}")]
pub struct Revert {
    pub method: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl Revert {
    pub fn new(method: impl Into<String>, err: SliceError) -> Self {
        Self { method: method.into(), kind: err.kind(), reason: err.to_string() }
    }
}

/// The storage actor.
///
/// Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct SliceActor {
    engine: Arc<SliceEngine>,
}

impl SliceActor {
    /// Start from empty state.
    pub fn open(config: Config) -> SliceResult<Self> {
        let engine = SliceEngine::open(config)?;
        Ok(Self { engine: Arc::new(engine) })
    }

    /// Start from a snapshot file written by [`SliceActor::checkpoint`].
    pub fn restore<P: AsRef<Path>>(path: P, config: Config) -> SliceResult<Self> {
        let path = path.as_ref();
        let engine = Snapshot::load(path)?.restore(config)?;
        info!(path = %path.display(), "actor restored");
        Ok(Self { engine: Arc::new(engine) })
    }

    /// Persist the current state to `path`.
    pub fn checkpoint<P: AsRef<Path>>(&self, path: P) -> SliceResult<()> {
        self.engine.snapshot().save(path.as_ref())
    }

    pub fn engine(&self) -> &SliceEngine {
        &self.engine
    }

    /// Open a transaction for one top-level call.
    pub fn begin(&self, ctx: CallContext) -> ActorTx<'_> {
        ActorTx::new(&self.engine, ctx)
    }

    /// Run `method` as its own call, paying `ctx.value`.
    pub fn execute(&self, ctx: CallContext, method: Method) -> Result<Output, Revert> {
        let mut tx = self.begin(ctx);
        let output = tx.invoke_paid(method, ctx.value);
        tx.finish();
        output
    }
}

impl std::fmt::Debug for SliceActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceActor").field("engine", &self.engine).finish()
    }
}
