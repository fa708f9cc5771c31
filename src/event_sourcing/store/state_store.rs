use async_trait::async_trait;
use chrono::Utc;
use scylla::client::session::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EsError;

// ============================================================================
// Current-State / Projection Store
// ============================================================================
//
// One JSON document per materialized entity, keyed by `(id, tenant_id)`,
// one container per view type. A Delete REMOVES the row; the canonical
// tombstone stays reconstructable from the event log.
//
// ============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<serde_json::Value>, EsError>;

    async fn upsert(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
        doc: serde_json::Value,
    ) -> Result<(), EsError>;

    /// Removing an absent row is a success no-op: the row may already have
    /// been deleted by a prior, not-yet-visible event.
    async fn remove(&self, container: &str, tenant_id: Uuid, id: Uuid) -> Result<(), EsError>;

    /// Prepare a fresh container for a full rebuild. Idempotent.
    async fn reset(&self, container: &str) -> Result<(), EsError>;
}

// ============================================================================
// ScyllaDB Backend
// ============================================================================

pub struct ScyllaStateStore {
    session: Arc<Session>,
}

impl ScyllaStateStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Create the backing table if it does not exist yet. All containers
    /// share one table; the container name is the partition prefix, so a
    /// rebuild can clear one container with a single partition delete.
    pub async fn prepare(&self) -> Result<(), EsError> {
        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS materialized_views (
                    container text,
                    tenant_id uuid,
                    id uuid,
                    doc text,
                    updated_at timestamp,
                    PRIMARY KEY ((container), tenant_id, id)
                )",
                &[],
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for ScyllaStateStore {
    async fn load(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<serde_json::Value>, EsError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT doc FROM materialized_views
                 WHERE container = ? AND tenant_id = ? AND id = ?",
                (container, tenant_id, id),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows_result.maybe_first_row::<(String,)>() {
            Ok(Some((doc,))) => Ok(Some(serde_json::from_str(&doc)?)),
            _ => Ok(None),
        }
    }

    async fn upsert(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
        doc: serde_json::Value,
    ) -> Result<(), EsError> {
        let doc_json = serde_json::to_string(&doc)?;
        self.session
            .query_unpaged(
                "INSERT INTO materialized_views (container, tenant_id, id, doc, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
                (container, tenant_id, id, doc_json, Utc::now()),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, container: &str, tenant_id: Uuid, id: Uuid) -> Result<(), EsError> {
        self.session
            .query_unpaged(
                "DELETE FROM materialized_views
                 WHERE container = ? AND tenant_id = ? AND id = ?",
                (container, tenant_id, id),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn reset(&self, container: &str) -> Result<(), EsError> {
        self.session
            .query_unpaged(
                "DELETE FROM materialized_views WHERE container = ?",
                (container,),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
