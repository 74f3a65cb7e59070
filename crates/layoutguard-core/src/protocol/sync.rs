//! Collaborative document sync protocol (replica <-> relay).
//!
//! Every message names the document it belongs to so one connection could
//! multiplex several documents later; today the relay binds one doc per socket.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LayoutError, Result};

/// Lamport timestamp with replica tie-break.
///
/// Total order: counter first, then replica id. Two distinct writes can never
/// compare equal because replica ids are unique per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    pub counter: u64,
    pub replica: String,
}

impl Clock {
    pub fn new(counter: u64, replica: impl Into<String>) -> Self {
        Self {
            counter,
            replica: replica.into(),
        }
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.replica.cmp(&other.replica))
    }
}

/// One field write, the unit of replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldUpdate {
    pub field: String,
    pub value: Value,
    pub clock: Clock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SyncMessage {
    /// Replica announces itself; relay answers with `SyncState`.
    Hello { doc: String, client: String },
    /// Full snapshot of the authoritative replica.
    SyncState { doc: String, updates: Vec<FieldUpdate> },
    /// Local write; `seq` is per-connection and echoed back in `Ack`.
    Update {
        doc: String,
        seq: u64,
        update: FieldUpdate,
    },
    Ack { doc: String, seq: u64 },
    /// Ephemeral presence; `state: null` means the client left.
    Awareness {
        doc: String,
        client: String,
        #[serde(default)]
        state: Option<Value>,
    },
    Error { code: String, msg: String },
}

impl SyncMessage {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LayoutError::Internal(format!("sync message encode failed: {e}")))
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| LayoutError::BadRequest(format!("invalid sync message: {e}")))
    }

    /// Document this message targets, if any.
    pub fn doc(&self) -> Option<&str> {
        match self {
            SyncMessage::Hello { doc, .. }
            | SyncMessage::SyncState { doc, .. }
            | SyncMessage::Update { doc, .. }
            | SyncMessage::Ack { doc, .. }
            | SyncMessage::Awareness { doc, .. } => Some(doc),
            SyncMessage::Error { .. } => None,
        }
    }
}
