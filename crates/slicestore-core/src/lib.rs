//! SliceStore Core: content-addressed, rent-metered record storage
//!
//! Slices are logical records with an owner set, a writer set, a bounded
//! version history and a prepaid rent balance. Every version is stored once
//! in a reference-counted content store keyed by the SHA-256 of its bytes.
//!
//! # Architecture
//!
//! - **Content store**: cid -> bytes, refcounted, deduplicated
//! - **Registry**: slice id -> owners, writers, balance, history
//! - **Rent**: balance drains per epoch in proportion to the footprint
//! - **Paths**: typed reads and staged partial writes into JSON documents
//! - **Snapshots**: CRC32C-framed dump of the whole state
//!
//! # Host Independence
//!
//! The engine never reads a clock or authenticates anyone. The caller, the
//! epoch and the attached payment arrive in a [`CallContext`]. Host-facing
//! dispatch lives in separate crates (e.g. slicestore-actor).

pub mod cid;
pub mod config;
pub mod content;
pub mod context;
pub mod engine;
pub mod error;
pub mod path;
pub mod rent;
pub mod scope;
pub mod slice;
pub mod snapshot;
pub mod staging;
pub mod value;

// Re-export key types for convenience
pub use cid::Cid;
pub use config::Config;
pub use context::CallContext;
pub use engine::{Created, EngineStats, SliceEngine, SliceInfo};
pub use error::{ErrorKind, Role, SliceError, SliceResult};
pub use path::Path;
pub use scope::CallScope;
pub use slice::SliceId;
pub use snapshot::Snapshot;
pub use value::{Scalar, ScalarKind, Value, ValueKind};
