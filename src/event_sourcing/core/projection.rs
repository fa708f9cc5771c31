use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::event::Event;
use super::state::StateView;
use crate::error::EsError;
use crate::event_sourcing::store::{EventStore, StateStore};

// ============================================================================
// Projection Contract
// ============================================================================
//
// Projections fold exactly like aggregates but may depend on data fetched
// from OUTSIDE the event log, once, when the projection row is first
// established. The seed step synthesizes one extra event carrying that
// external data so the projection stays rebuildable from ordered events.
//
// ============================================================================

/// Explicit handles handed to the seed step. Replaces any process-wide
/// singleton client: construction and teardown happen at the wiring layer.
#[derive(Clone)]
pub struct SeedContext {
    pub events: Arc<dyn EventStore>,
    pub state: Arc<dyn StateStore>,
    pub tenant_id: Uuid,
}

impl SeedContext {
    pub fn new(events: Arc<dyn EventStore>, state: Arc<dyn StateStore>, tenant_id: Uuid) -> Self {
        Self {
            events,
            state,
            tenant_id,
        }
    }
}

/// A derived, possibly multi-source read view.
#[async_trait]
pub trait ProjectionView: StateView {
    /// Storage identity of the materialized projection.
    fn container_name() -> &'static str;

    /// One-time external fetch performed before first materialization.
    /// Returns a synthetic event to fold AFTER the triggering event.
    /// Failure here is poison for this projection build; nothing gets
    /// persisted.
    async fn seed_external_data(
        &self,
        ctx: &SeedContext,
        trigger: &Event,
    ) -> Result<Event, EsError>;
}
