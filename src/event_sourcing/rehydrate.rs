use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EsError;
use crate::event_sourcing::core::{fold, StateView};
use crate::event_sourcing::store::EventStore;

// ============================================================================
// Rehydrator - Replay-Based State Reconstruction
// ============================================================================
//
// Reconstructs a view as of "now" or an arbitrary past instant by replaying
// its ordered event history onto a fresh default instance. This is the
// canonical ground truth the incremental materializer must always agree
// with, and the path a full rebuild takes for every aggregate.
//
// ============================================================================

pub struct Rehydrator {
    events: Arc<dyn EventStore>,
}

impl Rehydrator {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    /// Replay the history of one aggregate, optionally capped (inclusive)
    /// at `point_in_time`.
    ///
    /// An id with no history returns a fresh default instance, never an
    /// error: callers distinguish "no history" from "existed, then deleted"
    /// via `is_deleted` and `last_event_at`.
    pub async fn rehydrate<V: StateView>(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
        point_in_time: Option<DateTime<Utc>>,
    ) -> Result<V, EsError> {
        let history = self
            .events
            .read_history(tenant_id, aggregate_root_id, point_in_time)
            .await?;

        tracing::debug!(
            aggregate_root_id = %aggregate_root_id,
            view = V::aggregate_type(),
            events = history.len(),
            bounded = point_in_time.is_some(),
            "rehydrating from history"
        );

        fold(&history)
    }
}
