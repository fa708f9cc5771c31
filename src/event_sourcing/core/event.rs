use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::command::Command;

// ============================================================================
// Persisted Event Record
// ============================================================================
//
// The append/read unit of the log: one JSON document per event, partitioned
// by tenant, keyed by the owning aggregate root. Immutable once appended;
// the log is the source of truth and events are never deleted.
//
// ============================================================================

/// Semi-structured event payload: an ordered mapping of field name to value.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub aggregate_root_id: Uuid,
    /// Partition key of the event store.
    pub tenant_id: Uuid,
    /// Name of the command that produced this event. Resolved against the
    /// consuming view's registry at fold time.
    pub command: String,
    pub payload: Payload,
    /// Strictly used for ordering within one `aggregate_root_id`.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        aggregate_root_id: Uuid,
        tenant_id: Uuid,
        command: &Command,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_root_id,
            tenant_id,
            command: command.name().to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Pin the ordering timestamp. Used by tests and by replay tooling that
    /// must reproduce a historical sequence exactly.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pin the event id, so an idempotent retry reuses the original.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

pub fn serialize_event(event: &Event) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event(json: &str) -> Result<Event> {
    Ok(serde_json::from_str(json)?)
}

/// Convenience for building payloads from literal pairs.
pub fn payload_from(pairs: &[(&str, serde_json::Value)]) -> Payload {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}
