use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::utils::IsTransient;

// ============================================================================
// Runtime Error Taxonomy
// ============================================================================
//
// Every failure inside the append/apply/rehydrate/materialize path is one of
// these variants. The consumer boundary routes them:
//
// - transient       -> retried with backoff, dead-lettered when exhausted
// - out-of-order    -> discarded with a diagnostic
// - everything else -> poison, dead-lettered immediately
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EsError {
    /// Store or broker temporarily unreachable. Safe to retry.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An event with this id was already appended. Idempotent retries must
    /// reuse the original id, so this is a conflict, not corruption.
    #[error("duplicate event id: {id}")]
    DuplicateEvent { id: Uuid },

    /// Payload failed to parse or merge. Not retried.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Event is older than the last one applied for its aggregate.
    #[error("out-of-order event {event_id} for aggregate {aggregate_root_id}: {timestamp} precedes last applied {last_applied}")]
    OutOfOrder {
        event_id: Uuid,
        aggregate_root_id: Uuid,
        timestamp: DateTime<Utc>,
        last_applied: DateTime<Utc>,
    },

    /// Command name was never registered. A caller error, never defaulted.
    #[error("command not registered: {0}")]
    UnknownCommand(String),

    /// The projection's external-data seed step failed. Treated as poison
    /// for that projection build; nothing is partially persisted.
    #[error("projection seed failed: {0}")]
    SeedFailed(String),
}

impl EsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EsError::Unavailable(_))
    }
}

impl IsTransient for EsError {
    fn is_transient(&self) -> bool {
        EsError::is_transient(self)
    }
}

impl From<serde_json::Error> for EsError {
    fn from(e: serde_json::Error) -> Self {
        EsError::Malformed(e.to_string())
    }
}
