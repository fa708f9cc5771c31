use std::sync::Arc;

use crate::event_sourcing::core::Event;
use crate::event_sourcing::store::{DeadLetter, DeadLetterSink};
use crate::metrics::Metrics;

// ============================================================================
// Undeliverable Handler
// ============================================================================
//
// The system's only failure-absorption point. Poison events land here with
// full diagnostic context and the calling consumer moves on to the next
// message. `handle` must return under ANY circumstance: a dead-letter
// record is the only diagnostic trail for a poison message, so a sink
// failure is logged loudly but never propagated, and the operation takes no
// cancellation signal.
//
// ============================================================================

pub struct UndeliverableHandler {
    sink: Arc<dyn DeadLetterSink>,
    metrics: Option<Arc<Metrics>>,
}

impl UndeliverableHandler {
    pub fn new(sink: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            sink,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Record a poison event. `event` is absent when the consumer failed
    /// before parsing; `raw_payload` preserves the body in that case.
    pub async fn handle(
        &self,
        source: &str,
        error_message: &str,
        event: Option<Event>,
        raw_payload: Option<String>,
    ) {
        let letter = match (event, raw_payload) {
            (Some(event), _) => DeadLetter::for_event(source, error_message, event),
            (None, Some(raw)) => DeadLetter::for_raw(source, error_message, raw),
            (None, None) => DeadLetter::for_raw(source, error_message, String::new()),
        };

        tracing::error!(
            dead_letter_id = %letter.id,
            source,
            error = error_message,
            command = letter.command().unwrap_or("<unparsed>"),
            "💀 event routed to dead letters"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_dead_letter(source);
        }

        if let Err(sink_error) = self.sink.record(letter).await {
            // Swallowed: the consumer loop must continue regardless.
            tracing::error!(
                source,
                error = %sink_error,
                "failed to persist dead letter, diagnostic record lost"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EsError;
    use crate::event_sourcing::core::{payload_from, Command, CommandKind};
    use crate::event_sourcing::store::{DeadLetterStats, MemoryDeadLetterSink};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FailingSink;

    #[async_trait]
    impl DeadLetterSink for FailingSink {
        async fn record(&self, _letter: DeadLetter) -> Result<(), EsError> {
            Err(EsError::Unavailable("sink down".into()))
        }
        async fn recent(&self, _limit: usize) -> Result<Vec<DeadLetter>, EsError> {
            Ok(Vec::new())
        }
        async fn stats(&self) -> Result<DeadLetterStats, EsError> {
            Ok(DeadLetterStats::default())
        }
    }

    #[tokio::test]
    async fn records_exactly_one_dead_letter_per_event() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let handler = UndeliverableHandler::new(sink.clone());

        let command = Command::new("Update_Site", CommandKind::Update);
        let event = Event::new(Uuid::new_v4(), Uuid::new_v4(), &command, payload_from(&[]));

        handler
            .handle("site-consumer", "merge failed", Some(event.clone()), None)
            .await;

        let letters = sink.recent(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].source, "site-consumer");
        assert_eq!(letters[0].event.as_ref().unwrap().id, event.id);
    }

    #[tokio::test]
    async fn preserves_raw_body_when_parsing_never_happened() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let handler = UndeliverableHandler::new(sink.clone());

        handler
            .handle("site-consumer", "invalid json", None, Some("{broken".into()))
            .await;

        let letters = sink.recent(10).await.unwrap();
        assert_eq!(letters[0].raw_payload.as_deref(), Some("{broken"));
        assert!(letters[0].event.is_none());
    }

    #[tokio::test]
    async fn sink_failure_never_escapes() {
        let handler = UndeliverableHandler::new(Arc::new(FailingSink));
        // Completes without panicking or returning an error.
        handler.handle("site-consumer", "boom", None, None).await;
    }
}
