//! Error types for SliceStore operations
//!
//! All SliceStore errors are represented by the SliceError enum, which carries
//! enough context (slice id, cid, path, caller, limits) to explain a failure
//! without re-running it. Callers that only care about the class of failure
//! use [`SliceError::kind`].

use std::fmt;
use std::path::PathBuf;

use alloy_primitives::{Address, B256};
use thiserror::Error;

use crate::cid::Cid;

/// Coarse classification of every failure the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    NotFound,
    Unauthorized,
    Expired,
    PathNotFound,
    TypeMismatch,
    IndexOutOfRange,
    CapacityExceeded,
    MalformedDocument,
    Corrupted,
    Io,
}

impl ErrorKind {
    /// Stable identifier used in revert reasons and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Expired => "Expired",
            ErrorKind::PathNotFound => "PathNotFound",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::IndexOutOfRange => "IndexOutOfRange",
            ErrorKind::CapacityExceeded => "CapacityExceeded",
            ErrorKind::MalformedDocument => "MalformedDocument",
            ErrorKind::Corrupted => "Corrupted",
            ErrorKind::Io => "Io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Role a caller must hold for a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("owner"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

/// SliceStore error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum SliceError {
    /// Configuration or request shape rejected before any state was touched
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the request was rejected
        reason: String,
    },

    /// No live slice with this id
    #[error("slice {0} not found")]
    SliceNotFound(B256),

    /// No content stored under this cid
    #[error("content {0} not found")]
    ContentNotFound(Cid),

    /// Caller lacks the role the operation requires
    #[error("caller {caller} is not a {role} of slice {id}")]
    Unauthorized {
        id: B256,
        caller: Address,
        role: Role,
    },

    /// Rent balance lapsed; the slice awaits funding or pruning
    #[error("slice {id} expired at epoch {epoch}")]
    Expired {
        id: B256,
        /// Epoch at which the lapse was observed
        epoch: u64,
    },

    /// A path segment does not exist in the document
    #[error("path `{path}` not found in document")]
    PathNotFound { path: String },

    /// The value at a path does not have the requested shape
    #[error("type mismatch at `{path}`: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// List index past the end of an existing list
    #[error("index {index} out of range at `{path}` (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// A configured limit would be exceeded
    #[error("{what} of {requested} exceeds limit of {limit}")]
    CapacityExceeded {
        /// Which quantity overflowed (e.g. "history depth", "payload size")
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    /// Payload bytes could not be interpreted as a document
    #[error("malformed document: {reason}")]
    MalformedDocument { reason: String },

    /// Persisted state failed an integrity check
    #[error("corrupted snapshot: {reason}")]
    Corrupted { reason: String },

    /// I/O operation failed while saving or loading a snapshot
    #[error("I/O error: {message} ({kind})")]
    Io {
        path: Option<PathBuf>,
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl SliceError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SliceError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            SliceError::SliceNotFound(_) | SliceError::ContentNotFound(_) => ErrorKind::NotFound,
            SliceError::Unauthorized { .. } => ErrorKind::Unauthorized,
            SliceError::Expired { .. } => ErrorKind::Expired,
            SliceError::PathNotFound { .. } => ErrorKind::PathNotFound,
            SliceError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            SliceError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            SliceError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            SliceError::MalformedDocument { .. } => ErrorKind::MalformedDocument,
            SliceError::Corrupted { .. } => ErrorKind::Corrupted,
            SliceError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SliceError::InvalidConfig { reason: reason.into() }
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        SliceError::Corrupted { reason: reason.into() }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SliceError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Convert std::io::Error to SliceError::Io
impl From<std::io::Error> for SliceError {
    fn from(err: std::io::Error) -> Self {
        SliceError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for SliceStore operations
pub type SliceResult<T> = Result<T, SliceError>;
