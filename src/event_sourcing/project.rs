use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EsError;
use crate::event_sourcing::core::{apply, Event, ProjectionView, SeedContext, StateView};
use crate::event_sourcing::materialize::EventApplier;
use crate::event_sourcing::store::StateStore;
use crate::utils::KeyLocks;

// ============================================================================
// Projection Engine
// ============================================================================
//
// Same fold mechanics as the current-state materializer, extended with the
// one-time external-data seam: the command that establishes a projection
// row triggers `seed_external_data`, which synthesizes one extra event so
// the externally fetched data flows through the same ordered fold as
// everything else. A seed failure is poison for that build; nothing is
// partially persisted.
//
// Single-writer-per-key: event delivery is ordered per aggregate, and the
// key locks close the remaining read-modify-write window inside a worker.
//
// ============================================================================

pub struct ProjectionEngine<P: ProjectionView> {
    state: Arc<dyn StateStore>,
    ctx: SeedContext,
    locks: KeyLocks,
    source: String,
    _view: PhantomData<P>,
}

impl<P: ProjectionView> ProjectionEngine<P> {
    pub fn new(state: Arc<dyn StateStore>, ctx: SeedContext) -> Self {
        Self {
            state,
            ctx,
            locks: KeyLocks::new(),
            source: format!("{}-projection", P::container_name()),
            _view: PhantomData,
        }
    }

    /// Incremental materialization of one event into the projection
    /// container.
    pub async fn apply_event(&self, event: &Event) -> Result<(), EsError> {
        let Some(command) = P::registry().get(&event.command) else {
            return Ok(());
        };

        let _guard = self
            .locks
            .acquire(event.tenant_id, event.aggregate_root_id)
            .await;

        if command.is_new() {
            self.establish(event).await
        } else {
            self.fold_into_existing(event).await
        }
    }

    /// First materialization: seed, then fold trigger and seed event in
    /// that order onto a fresh instance, then persist once.
    async fn establish(&self, trigger: &Event) -> Result<(), EsError> {
        let mut view = P::default();

        let seed_event = view.seed_external_data(&self.ctx, trigger).await?;

        apply(&mut view, trigger)?;
        apply(&mut view, &seed_event)?;

        tracing::info!(
            aggregate_root_id = %trigger.aggregate_root_id,
            container = P::container_name(),
            seed_command = %seed_event.command,
            "projection established with seeded data"
        );

        self.persist(trigger.tenant_id, trigger.aggregate_root_id, &view)
            .await
    }

    async fn fold_into_existing(&self, event: &Event) -> Result<(), EsError> {
        let existing = self
            .state
            .load(P::container_name(), event.tenant_id, event.aggregate_root_id)
            .await?;

        // Absent row: already deleted, success no-op.
        let Some(doc) = existing else {
            tracing::debug!(
                aggregate_root_id = %event.aggregate_root_id,
                container = P::container_name(),
                "no projection row, skipping"
            );
            return Ok(());
        };

        let mut view: P = serde_json::from_value(doc)?;
        apply(&mut view, event)?;
        self.persist(event.tenant_id, event.aggregate_root_id, &view)
            .await
    }

    /// Read-modify-write of several events against one projection key, in
    /// the order given.
    pub async fn apply_and_persist(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
        events: &[Event],
    ) -> Result<(), EsError> {
        let _guard = self.locks.acquire(tenant_id, aggregate_root_id).await;

        let existing = self
            .state
            .load(P::container_name(), tenant_id, aggregate_root_id)
            .await?;
        let mut view: P = match existing {
            Some(doc) => serde_json::from_value(doc)?,
            None => P::default(),
        };

        for event in events {
            apply(&mut view, event)?;
        }

        self.persist(tenant_id, aggregate_root_id, &view).await
    }

    async fn persist(&self, tenant_id: Uuid, id: Uuid, view: &P) -> Result<(), EsError> {
        if view.is_deleted() {
            self.state.remove(P::container_name(), tenant_id, id).await
        } else {
            self.state
                .upsert(
                    P::container_name(),
                    tenant_id,
                    id,
                    serde_json::to_value(view)?,
                )
                .await
        }
    }
}

#[async_trait]
impl<P: ProjectionView> EventApplier for ProjectionEngine<P> {
    fn source_name(&self) -> &str {
        &self.source
    }

    async fn on_event(&self, event: &Event) -> Result<(), EsError> {
        self.apply_event(event).await
    }
}
