//! Record and identifier types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Temporary id for a record the server has not yet acknowledged.
///
/// Unique within the process. Rendered as `tmp-<n>`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
    /// Allocate the next process-unique local id.
    pub fn next() -> Self {
        Self(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Id assigned by the server. Numeric ids are kept in their decimal form.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for ServerId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if !s.is_empty() => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected non-empty string or number id, got {other}"
            ))),
        }
    }
}

/// Record identity: temporary until the server confirms the record.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntityId {
    Local(LocalId),
    Remote(ServerId),
}

impl EntityId {
    pub fn is_local(&self) -> bool {
        matches!(self, EntityId::Local(_))
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            EntityId::Local(id) => Some(*id),
            EntityId::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&ServerId> {
        match self {
            EntityId::Remote(id) => Some(id),
            EntityId::Local(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Local(id) => id.fmt(f),
            EntityId::Remote(id) => id.fmt(f),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<LocalId> for EntityId {
    fn from(id: LocalId) -> Self {
        EntityId::Local(id)
    }
}

impl From<ServerId> for EntityId {
    fn from(id: ServerId) -> Self {
        EntityId::Remote(id)
    }
}

/// Whether the server has acknowledged the record's current state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// A local change is waiting for the server.
    Pending,
    /// Matches what the server last returned.
    Confirmed,
    /// The server accepted a change but its answer could not be applied.
    Failed,
}

/// A domain record with its identity and sync state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRecord<T> {
    pub id: EntityId,
    pub fields: T,
    pub sync_state: SyncState,
}

impl<T> EntityRecord<T> {
    pub fn new(id: impl Into<EntityId>, fields: T, sync_state: SyncState) -> Self {
        Self {
            id: id.into(),
            fields,
            sync_state,
        }
    }

    /// A record as returned by the server.
    pub fn confirmed(id: ServerId, fields: T) -> Self {
        Self::new(id, fields, SyncState::Confirmed)
    }

    /// A locally created record awaiting the server.
    pub fn pending_local(id: LocalId, fields: T) -> Self {
        Self::new(id, fields, SyncState::Pending)
    }
}
