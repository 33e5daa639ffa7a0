//! The storage actor's method surface.
//!
//! The interface exposes one entry point per value kind for typed reads and
//! partial writes (`parseLatestSliceUint256Array`, `writeSubSliceAddress`,
//! ...). Here each family is a single variant carrying a [`ValueKind`];
//! [`Method::name`] rebuilds the interface name from it.

use alloy_primitives::{Address, Bytes, U256};

use slicestore_core::{Cid, Created, SliceId, SliceInfo, Value, ValueKind};

/// One call against the storage actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    CreateSlice {
        owners: Vec<Address>,
        writers: Vec<Address>,
        history_depth: u32,
        payload: Bytes,
    },
    FundSlice { id: SliceId },
    AddOwners { id: SliceId, members: Vec<Address> },
    RemoveOwners { id: SliceId, members: Vec<Address> },
    AddWriters { id: SliceId, members: Vec<Address> },
    RemoveWriters { id: SliceId, members: Vec<Address> },
    SetHistoryDepth { id: SliceId, depth: u32 },
    GetSlice { id: SliceId },
    GetLatestSliceData { id: SliceId },
    GetCid { cid: Cid },
    ParseLatestSlice { id: SliceId, path: String, kind: ValueKind },
    ParseCid { cid: Cid, path: String, kind: ValueKind },
    WriteSlice { id: SliceId, payload: Bytes },
    /// Stage `value` at `path`; with `commit` every staged write for `id` is
    /// stored as one new version.
    WriteSubSlice { id: SliceId, path: String, value: Value, commit: bool },
    PruneSlice { id: SliceId },
}

impl Method {
    /// Interface name of this call.
    pub fn name(&self) -> String {
        match self {
            Method::CreateSlice { .. } => "createSlice".into(),
            Method::FundSlice { .. } => "fundSlice".into(),
            Method::AddOwners { .. } => "addOwners".into(),
            Method::RemoveOwners { .. } => "removeOwners".into(),
            Method::AddWriters { .. } => "addWriters".into(),
            Method::RemoveWriters { .. } => "removeWriters".into(),
            Method::SetHistoryDepth { .. } => "setHistoryDepth".into(),
            Method::GetSlice { .. } => "getSlice".into(),
            Method::GetLatestSliceData { .. } => "getLatestSliceData".into(),
            Method::GetCid { .. } => "getCID".into(),
            Method::ParseLatestSlice { kind, .. } => format!("parseLatestSlice{}", kind.type_name()),
            Method::ParseCid { kind, .. } => format!("parseCID{}", kind.type_name()),
            Method::WriteSlice { .. } => "writeSlice".into(),
            Method::WriteSubSlice { value, .. } => format!("writeSubSlice{}", value.kind().type_name()),
            Method::PruneSlice { .. } => "pruneSlice".into(),
        }
    }

    /// Whether the call may carry a payment.
    pub fn is_payable(&self) -> bool {
        matches!(self, Method::CreateSlice { .. } | Method::FundSlice { .. })
    }

    /// Every interface name, in declaration order with typed families
    /// expanded.
    pub fn interface_names() -> Vec<String> {
        let mut names: Vec<String> = [
            "createSlice",
            "fundSlice",
            "addOwners",
            "removeOwners",
            "addWriters",
            "removeWriters",
            "setHistoryDepth",
            "getSlice",
            "getLatestSliceData",
            "getCID",
            "writeSlice",
            "pruneSlice",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        for prefix in ["parseLatestSlice", "parseCID", "writeSubSlice"] {
            names.extend(ValueKind::all().map(|kind| format!("{}{}", prefix, kind.type_name())));
        }
        names
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Created(Created),
    /// Balance after funding
    Balance(U256),
    /// Members actually added or removed
    Changed(usize),
    /// Cids dropped by a history-depth change
    Evicted(Vec<Cid>),
    Slice(SliceInfo),
    Data(Bytes),
    Value(Value),
    Written(Cid),
    /// `None` while the write is only staged
    Staged(Option<Cid>),
    Pruned(bool),
}

impl Output {
    pub fn created(&self) -> Option<&Created> {
        match self {
            Output::Created(created) => Some(created),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Output::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Cid of the version a write produced, if it produced one.
    pub fn cid(&self) -> Option<Cid> {
        match self {
            Output::Created(created) => Some(created.cid),
            Output::Written(cid) => Some(*cid),
            Output::Staged(cid) => *cid,
            _ => None,
        }
    }
}
