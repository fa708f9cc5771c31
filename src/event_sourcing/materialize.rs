use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::EsError;
use crate::event_sourcing::core::{apply, fold, Event, StateView};
use crate::event_sourcing::store::{EventStore, StateStore};
use crate::utils::KeyLocks;

// ============================================================================
// Current-State Materializer
// ============================================================================
//
// Maintains the denormalized, queryable snapshot per aggregate. Two modes
// that must converge on the same snapshot for the same log:
//
// - incremental: apply each event to the stored row as it arrives
// - full rebuild: replay every aggregate's history from the log into a
//   freshly prepared container
//
// A Delete REMOVES the row from the read path; the tombstone remains
// reconstructable by rehydration.
//
// ============================================================================

/// Anything the consumer boundary can feed events to.
#[async_trait]
pub trait EventApplier: Send + Sync {
    /// Name used as the dead-letter `source` for failures in this applier.
    fn source_name(&self) -> &str;

    async fn on_event(&self, event: &Event) -> Result<(), EsError>;
}

pub struct CurrentStateMaterializer<V: StateView> {
    events: Arc<dyn EventStore>,
    state: Arc<dyn StateStore>,
    locks: KeyLocks,
    source: String,
    _view: PhantomData<V>,
}

/// Outcome of one full-rebuild run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub rebuilt: usize,
    pub skipped_deleted: usize,
    /// Aggregates whose history contains no command of this view type.
    pub skipped_foreign: usize,
    pub cancelled: bool,
}

impl<V: StateView> CurrentStateMaterializer<V> {
    pub fn new(events: Arc<dyn EventStore>, state: Arc<dyn StateStore>) -> Self {
        Self {
            events,
            state,
            locks: KeyLocks::new(),
            source: format!("{}-current-state", V::aggregate_type()),
            _view: PhantomData,
        }
    }

    /// Incremental materialization of one event.
    ///
    /// Net effect must equal rehydrating the aggregate up to the event's
    /// timestamp. A non-creating command against an absent row is a success
    /// no-op: the row may already have been deleted by a prior event.
    pub async fn apply_event(&self, event: &Event) -> Result<(), EsError> {
        let Some(command) = V::registry().get(&event.command) else {
            return Ok(());
        };

        let _guard = self
            .locks
            .acquire(event.tenant_id, event.aggregate_root_id)
            .await;

        let container = V::aggregate_type();
        let existing = self
            .state
            .load(container, event.tenant_id, event.aggregate_root_id)
            .await?;

        let mut view: V = match existing {
            Some(doc) => serde_json::from_value(doc)?,
            None if command.is_new() => V::default(),
            None => {
                tracing::debug!(
                    aggregate_root_id = %event.aggregate_root_id,
                    command = %event.command,
                    "no row for non-creating command, skipping"
                );
                return Ok(());
            }
        };

        apply(&mut view, event)?;

        if view.is_deleted() {
            self.state
                .remove(container, event.tenant_id, event.aggregate_root_id)
                .await?;
            tracing::info!(
                aggregate_root_id = %event.aggregate_root_id,
                container,
                "row removed after delete event"
            );
        } else {
            self.state
                .upsert(
                    container,
                    event.tenant_id,
                    event.aggregate_root_id,
                    serde_json::to_value(&view)?,
                )
                .await?;
        }

        Ok(())
    }

    /// Full rebuild: replay every aggregate in the log into a freshly
    /// prepared container. Idempotent and safe to re-run; a cancelled or
    /// partially failed run leaves already-processed rows correct and is
    /// resumed by simply running again.
    pub async fn rebuild(&self, cancel: &CancellationToken) -> Result<RebuildSummary, EsError> {
        let container = V::aggregate_type();
        tracing::info!(container, "rebuilding current state from the event log");

        self.state.reset(container).await?;

        let mut summary = RebuildSummary::default();

        for (tenant_id, aggregate_root_id) in self.events.aggregate_roots().await? {
            if cancel.is_cancelled() {
                tracing::warn!(
                    container,
                    rebuilt = summary.rebuilt,
                    "rebuild cancelled, container left partially filled"
                );
                summary.cancelled = true;
                return Ok(summary);
            }

            let history = self
                .events
                .read_history(tenant_id, aggregate_root_id, None)
                .await?;
            let view: V = fold(&history)?;

            if view.last_event_at().is_none() {
                // Shared event stream: every command here belongs to some
                // other view type.
                summary.skipped_foreign += 1;
                continue;
            }
            if view.is_deleted() {
                summary.skipped_deleted += 1;
                continue;
            }

            self.state
                .upsert(
                    container,
                    tenant_id,
                    aggregate_root_id,
                    serde_json::to_value(&view)?,
                )
                .await?;
            summary.rebuilt += 1;
        }

        tracing::info!(
            container,
            rebuilt = summary.rebuilt,
            skipped_deleted = summary.skipped_deleted,
            skipped_foreign = summary.skipped_foreign,
            "rebuild complete"
        );
        Ok(summary)
    }
}

#[async_trait]
impl<V: StateView> EventApplier for CurrentStateMaterializer<V> {
    fn source_name(&self) -> &str {
        &self.source
    }

    async fn on_event(&self, event: &Event) -> Result<(), EsError> {
        self.apply_event(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site::{site_commands, Site};
    use crate::event_sourcing::core::{payload_from, Payload};
    use crate::event_sourcing::store::{MemoryEventStore, MemoryStateStore};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    struct Fixture {
        events: Arc<MemoryEventStore>,
        state: Arc<MemoryStateStore>,
        materializer: CurrentStateMaterializer<Site>,
        tenant: Uuid,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(MemoryEventStore::new());
        let state = Arc::new(MemoryStateStore::new());
        let materializer =
            CurrentStateMaterializer::<Site>::new(events.clone(), state.clone());
        Fixture {
            events,
            state,
            materializer,
            tenant: Uuid::new_v4(),
        }
    }

    async fn lifecycle(fx: &Fixture, root: Uuid) -> Vec<Event> {
        let commands = site_commands();
        let t0 = Utc::now();
        let events = vec![
            Event::new(
                root,
                fx.tenant,
                commands.lookup("Create_Site").unwrap(),
                payload_from(&[("name", json!("A"))]),
            )
            .at(t0),
            Event::new(
                root,
                fx.tenant,
                commands.lookup("Update_Site").unwrap(),
                payload_from(&[("name", json!("B"))]),
            )
            .at(t0 + Duration::seconds(1)),
            Event::new(
                root,
                fx.tenant,
                commands.lookup("Delete_Site").unwrap(),
                Payload::default(),
            )
            .at(t0 + Duration::seconds(2)),
        ];
        for event in &events {
            fx.events.append(event.clone()).await.unwrap();
        }
        events
    }

    #[tokio::test]
    async fn incremental_path_tracks_the_lifecycle() {
        let fx = fixture();
        let root = Uuid::new_v4();
        let events = lifecycle(&fx, root).await;

        fx.materializer.apply_event(&events[0]).await.unwrap();
        let doc = fx.state.load("Site", fx.tenant, root).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("A"));

        fx.materializer.apply_event(&events[1]).await.unwrap();
        let doc = fx.state.load("Site", fx.tenant, root).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("B"));

        // Delete removes the row from the read path entirely.
        fx.materializer.apply_event(&events[2]).await.unwrap();
        assert!(fx.state.load("Site", fx.tenant, root).await.unwrap().is_none());
        assert_eq!(fx.state.rows("Site").await, 0);
    }

    #[tokio::test]
    async fn duplicate_delete_delivery_is_idempotent() {
        let fx = fixture();
        let root = Uuid::new_v4();
        let events = lifecycle(&fx, root).await;

        for event in &events {
            fx.materializer.apply_event(event).await.unwrap();
        }
        // Redelivered delete: row already gone, still a success.
        fx.materializer.apply_event(&events[2]).await.unwrap();
        assert_eq!(fx.state.rows("Site").await, 0);
    }

    #[tokio::test]
    async fn update_for_unknown_aggregate_is_a_noop() {
        let fx = fixture();
        let commands = site_commands();
        let orphan = Event::new(
            Uuid::new_v4(),
            fx.tenant,
            commands.lookup("Update_Site").unwrap(),
            payload_from(&[("name", json!("ghost"))]),
        );

        fx.materializer.apply_event(&orphan).await.unwrap();
        assert_eq!(fx.state.rows("Site").await, 0);
    }

    #[tokio::test]
    async fn batch_and_stream_modes_converge() {
        let fx = fixture();
        let commands = site_commands();
        let t0 = Utc::now();

        // Three aggregates: one live, one deleted, one updated twice.
        let live = Uuid::new_v4();
        let deleted = Uuid::new_v4();
        let busy = Uuid::new_v4();

        let mut events = vec![
            Event::new(
                live,
                fx.tenant,
                commands.lookup("Create_Site").unwrap(),
                payload_from(&[("name", json!("live"))]),
            )
            .at(t0),
            Event::new(
                deleted,
                fx.tenant,
                commands.lookup("Create_Site").unwrap(),
                payload_from(&[("name", json!("gone"))]),
            )
            .at(t0),
            Event::new(
                deleted,
                fx.tenant,
                commands.lookup("Delete_Site").unwrap(),
                Payload::default(),
            )
            .at(t0 + Duration::seconds(1)),
            Event::new(
                busy,
                fx.tenant,
                commands.lookup("Create_Site").unwrap(),
                payload_from(&[("name", json!("v1")), ("checks", json!(1))]),
            )
            .at(t0),
            Event::new(
                busy,
                fx.tenant,
                commands.lookup("Update_Site").unwrap(),
                payload_from(&[("name", json!("v2"))]),
            )
            .at(t0 + Duration::seconds(2)),
        ];
        events.sort_by_key(|e| e.timestamp);

        for event in &events {
            fx.events.append(event.clone()).await.unwrap();
            fx.materializer.apply_event(event).await.unwrap();
        }

        let incremental_live = fx.state.load("Site", fx.tenant, live).await.unwrap();
        let incremental_busy = fx.state.load("Site", fx.tenant, busy).await.unwrap();

        let summary = fx
            .materializer
            .rebuild(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.rebuilt, 2);
        assert_eq!(summary.skipped_deleted, 1);
        assert!(!summary.cancelled);

        assert_eq!(
            fx.state.load("Site", fx.tenant, live).await.unwrap(),
            incremental_live
        );
        assert_eq!(
            fx.state.load("Site", fx.tenant, busy).await.unwrap(),
            incremental_busy
        );
        assert!(fx.state.load("Site", fx.tenant, deleted).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rebuild_is_rerunnable() {
        let fx = fixture();
        let root = Uuid::new_v4();
        lifecycle(&fx, root).await;

        let first = fx
            .materializer
            .rebuild(&CancellationToken::new())
            .await
            .unwrap();
        let second = fx
            .materializer
            .rebuild(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancelled_rebuild_reports_partial_state() {
        let fx = fixture();
        lifecycle(&fx, Uuid::new_v4()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = fx.materializer.rebuild(&cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.rebuilt, 0);
    }
}
