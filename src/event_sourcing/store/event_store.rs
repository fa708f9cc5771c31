use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EsError;
use crate::event_sourcing::core::Event;

// ============================================================================
// Event Store - Append-Only, Time-Ordered Log
// ============================================================================
//
// Responsibilities:
// 1. Append events durably, partitioned by tenant, keyed by aggregate root
// 2. Reject a duplicate event id as a conflict (idempotent retries reuse
//    the original id)
// 3. Validate the ordering timestamp: never accept an event older than the
//    newest one already appended for its aggregate
// 4. Serve ordered history reads, optionally capped at a point in time
//
// ============================================================================

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. On success the event is durable and visible to
    /// every subsequent `read_history` call for its aggregate.
    async fn append(&self, event: Event) -> Result<Event, EsError>;

    /// Ordered history for one aggregate, ascending by `(timestamp, id)`.
    /// `upper_bound` is inclusive.
    async fn read_history(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
        upper_bound: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, EsError>;

    /// Distinct `(tenant_id, aggregate_root_id)` keys present in the log.
    /// Drives full rebuild.
    async fn aggregate_roots(&self) -> Result<Vec<(Uuid, Uuid)>, EsError>;
}

// ============================================================================
// ScyllaDB Backend
// ============================================================================

pub struct ScyllaEventStore {
    session: Arc<Session>,
}

impl ScyllaEventStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Create the log tables if they do not exist yet.
    pub async fn prepare(&self) -> Result<(), EsError> {
        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS event_log (
                    tenant_id uuid,
                    aggregate_root_id uuid,
                    ts timestamp,
                    id uuid,
                    command text,
                    payload text,
                    PRIMARY KEY ((tenant_id, aggregate_root_id), ts, id)
                )",
                &[],
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        // Side table for duplicate-id detection across partitions.
        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS event_ids (id uuid PRIMARY KEY)",
                &[],
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn id_exists(&self, id: Uuid) -> Result<bool, EsError> {
        let result = self
            .session
            .query_unpaged("SELECT id FROM event_ids WHERE id = ?", (id,))
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(false),
        };

        match rows_result.maybe_first_row::<(Uuid,)>() {
            Ok(Some(_)) => Ok(true),
            _ => Ok(false),
        }
    }

    async fn newest_timestamp(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, EsError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT ts FROM event_log
                 WHERE tenant_id = ? AND aggregate_root_id = ?
                 ORDER BY ts DESC LIMIT 1",
                (tenant_id, aggregate_root_id),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows_result.maybe_first_row::<(DateTime<Utc>,)>() {
            Ok(Some((ts,))) => Ok(Some(ts)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl EventStore for ScyllaEventStore {
    async fn append(&self, event: Event) -> Result<Event, EsError> {
        if self.id_exists(event.id).await? {
            return Err(EsError::DuplicateEvent { id: event.id });
        }

        if let Some(newest) = self
            .newest_timestamp(event.tenant_id, event.aggregate_root_id)
            .await?
        {
            if event.timestamp < newest {
                return Err(EsError::OutOfOrder {
                    event_id: event.id,
                    aggregate_root_id: event.aggregate_root_id,
                    timestamp: event.timestamp,
                    last_applied: newest,
                });
            }
        }

        let payload_json = serde_json::to_string(&event.payload)?;

        let mut batch = scylla::statement::batch::Batch::default();
        batch.append_statement(
            "INSERT INTO event_log (tenant_id, aggregate_root_id, ts, id, command, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        );
        batch.append_statement("INSERT INTO event_ids (id) VALUES (?)");

        let values: Vec<Box<dyn scylla::serialize::row::SerializeRow + Send + Sync>> = vec![
            Box::new((
                event.tenant_id,
                event.aggregate_root_id,
                event.timestamp,
                event.id,
                event.command.clone(),
                payload_json,
            )),
            Box::new((event.id,)),
        ];

        self.session
            .batch(&batch, values)
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        tracing::debug!(
            event_id = %event.id,
            aggregate_root_id = %event.aggregate_root_id,
            command = %event.command,
            "appended event"
        );

        Ok(event)
    }

    async fn read_history(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
        upper_bound: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, EsError> {
        let result = match upper_bound {
            Some(bound) => {
                self.session
                    .query_unpaged(
                        "SELECT ts, id, command, payload FROM event_log
                         WHERE tenant_id = ? AND aggregate_root_id = ? AND ts <= ?
                         ORDER BY ts ASC",
                        (tenant_id, aggregate_root_id, bound),
                    )
                    .await
            }
            None => {
                self.session
                    .query_unpaged(
                        "SELECT ts, id, command, payload FROM event_log
                         WHERE tenant_id = ? AND aggregate_root_id = ?
                         ORDER BY ts ASC",
                        (tenant_id, aggregate_root_id),
                    )
                    .await
            }
        }
        .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events),
        };

        for row in rows_result
            .rows::<(DateTime<Utc>, Uuid, String, String)>()
            .map_err(|e| EsError::Unavailable(e.to_string()))?
        {
            let (ts, id, command, payload_json) =
                row.map_err(|e| EsError::Unavailable(e.to_string()))?;
            let payload = serde_json::from_str(&payload_json)?;

            events.push(Event {
                id,
                aggregate_root_id,
                tenant_id,
                command,
                payload,
                timestamp: ts,
            });
        }

        Ok(events)
    }

    async fn aggregate_roots(&self) -> Result<Vec<(Uuid, Uuid)>, EsError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT DISTINCT tenant_id, aggregate_root_id FROM event_log",
                &[],
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let mut roots = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(roots),
        };

        for row in rows_result
            .rows::<(Uuid, Uuid)>()
            .map_err(|e| EsError::Unavailable(e.to_string()))?
        {
            let key = row.map_err(|e| EsError::Unavailable(e.to_string()))?;
            roots.push(key);
        }

        Ok(roots)
    }
}
