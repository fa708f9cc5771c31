use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EsError;
use crate::event_sourcing::core::{serialize_event, Event};

// ============================================================================
// Dead-Letter Sink
// ============================================================================
//
// Durable side channel for poison events. Written by the Undeliverable
// Handler, read only by operators for inspection and replay. The core never
// consumes it.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    /// Which consumer gave up on the message.
    pub source: String,
    pub error_message: String,
    /// The parsed event, when parsing got that far.
    pub event: Option<Event>,
    /// The raw body, when the consumer failed before parsing.
    pub raw_payload: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn for_event(source: &str, error_message: &str, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            error_message: error_message.to_string(),
            event: Some(event),
            raw_payload: None,
            received_at: Utc::now(),
        }
    }

    pub fn for_raw(source: &str, error_message: &str, raw_payload: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            error_message: error_message.to_string(),
            event: None,
            raw_payload: Some(raw_payload),
            received_at: Utc::now(),
        }
    }

    /// Command name for operator grouping; parse failures have none.
    pub fn command(&self) -> Option<&str> {
        self.event.as_ref().map(|e| e.command.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadLetterStats {
    pub total: i64,
    pub by_source: HashMap<String, i64>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> Result<(), EsError>;

    /// Operator surface: newest-first inspection window.
    async fn recent(&self, limit: usize) -> Result<Vec<DeadLetter>, EsError>;

    async fn stats(&self) -> Result<DeadLetterStats, EsError>;
}

// ============================================================================
// ScyllaDB Backend
// ============================================================================

pub struct ScyllaDeadLetterSink {
    session: Arc<Session>,
}

impl ScyllaDeadLetterSink {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn prepare(&self) -> Result<(), EsError> {
        self.session
            .query_unpaged(
                "CREATE TABLE IF NOT EXISTS dead_letters (
                    id uuid PRIMARY KEY,
                    source text,
                    error_message text,
                    event_json text,
                    raw_payload text,
                    received_at timestamp
                )",
                &[],
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for ScyllaDeadLetterSink {
    async fn record(&self, letter: DeadLetter) -> Result<(), EsError> {
        let event_json = match &letter.event {
            Some(event) => Some(serialize_event(event).map_err(|e| EsError::Malformed(e.to_string()))?),
            None => None,
        };

        self.session
            .query_unpaged(
                "INSERT INTO dead_letters
                    (id, source, error_message, event_json, raw_payload, received_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    letter.id,
                    &letter.source,
                    &letter.error_message,
                    event_json,
                    &letter.raw_payload,
                    letter.received_at,
                ),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DeadLetter>, EsError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT id, source, error_message, event_json, raw_payload, received_at
                 FROM dead_letters LIMIT ?",
                (limit as i32,),
            )
            .await
            .map_err(|e| EsError::Unavailable(e.to_string()))?;

        let mut letters = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(letters),
        };

        for row in rows_result
            .rows::<(Uuid, String, String, Option<String>, Option<String>, DateTime<Utc>)>()
            .map_err(|e| EsError::Unavailable(e.to_string()))?
        {
            let (id, source, error_message, event_json, raw_payload, received_at) =
                row.map_err(|e| EsError::Unavailable(e.to_string()))?;

            let event = match event_json {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };

            letters.push(DeadLetter {
                id,
                source,
                error_message,
                event,
                raw_payload,
                received_at,
            });
        }

        letters.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(letters)
    }

    async fn stats(&self) -> Result<DeadLetterStats, EsError> {
        let letters = self.recent(i32::MAX as usize).await?;
        let mut stats = DeadLetterStats::default();
        for letter in letters {
            stats.total += 1;
            *stats.by_source.entry(letter.source).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
