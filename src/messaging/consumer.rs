use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::EsError;
use crate::event_sourcing::core::Event;
use crate::event_sourcing::materialize::EventApplier;
use crate::event_sourcing::undeliverable::UndeliverableHandler;
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Consumer Error Boundary
// ============================================================================
//
// The one place failures are classified. Nothing past this point throws
// into the delivery substrate; whatever happens, the loop continues with
// the next message.
//
//   parse failure            -> dead letter, raw body preserved
//   transient infra error    -> retried with backoff, dead letter if spent
//   out-of-order event       -> discarded with a diagnostic
//   any other failure        -> dead letter with full context
//
// ============================================================================

pub struct EventConsumer {
    appliers: Vec<Arc<dyn EventApplier>>,
    undeliverable: Arc<UndeliverableHandler>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl EventConsumer {
    pub fn new(undeliverable: Arc<UndeliverableHandler>) -> Self {
        Self {
            appliers: Vec::new(),
            undeliverable,
            retry: RetryConfig::consumer(),
            metrics: None,
        }
    }

    pub fn with_applier(mut self, applier: Arc<dyn EventApplier>) -> Self {
        self.appliers.push(applier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Entry point for raw broker payloads.
    pub async fn process_raw(&self, raw: &[u8]) {
        match serde_json::from_slice::<Event>(raw) {
            Ok(event) => self.process(event).await,
            Err(parse_error) => {
                self.undeliverable
                    .handle(
                        "event-consumer",
                        &format!("failed to parse event: {parse_error}"),
                        None,
                        Some(String::from_utf8_lossy(raw).into_owned()),
                    )
                    .await;
            }
        }
    }

    /// Route one parsed event through every registered applier.
    pub async fn process(&self, event: Event) {
        for applier in &self.appliers {
            let source = applier.source_name();
            let started = Instant::now();

            let outcome =
                retry_on_transient(self.retry.clone(), |_| applier.on_event(&event)).await;

            match outcome {
                RetryResult::Success(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_applied(source, started.elapsed().as_secs_f64());
                    }
                }
                RetryResult::Permanent(EsError::OutOfOrder {
                    event_id,
                    aggregate_root_id,
                    timestamp,
                    last_applied,
                }) => {
                    // Detected regression: discard, never apply out of order.
                    tracing::warn!(
                        source,
                        event_id = %event_id,
                        aggregate_root_id = %aggregate_root_id,
                        %timestamp,
                        %last_applied,
                        "discarding out-of-order event"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_out_of_order(source);
                    }
                }
                RetryResult::Permanent(error) | RetryResult::Exhausted(error) => {
                    self.undeliverable
                        .handle(source, &error.to_string(), Some(event.clone()), None)
                        .await;
                }
            }
        }
    }
}

/// Drive an `EventConsumer` from broker topics until cancelled. Per-key
/// ordering comes from the broker: events for one aggregate share a
/// partition, and each partition has a single consumer instance.
pub async fn run_kafka_consumer(
    brokers: &str,
    group_id: &str,
    topics: &[&str],
    consumer: Arc<EventConsumer>,
    cancel: CancellationToken,
) -> Result<(), EsError> {
    let kafka: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "earliest")
        .create()
        .map_err(|e| EsError::Unavailable(format!("kafka consumer: {e}")))?;

    kafka
        .subscribe(topics)
        .map_err(|e| EsError::Unavailable(format!("kafka subscribe: {e}")))?;

    tracing::info!(group_id, ?topics, "consumer loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(group_id, "consumer loop stopped");
                return Ok(());
            }
            received = kafka.recv() => {
                match received {
                    Ok(message) => {
                        if let Some(payload) = message.payload() {
                            consumer.process_raw(payload).await;
                        }
                    }
                    Err(e) => {
                        // Broker hiccup; the next recv() re-polls.
                        tracing::error!(error = %e, "broker receive error");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site::{site_commands, Site};
    use crate::event_sourcing::core::payload_from;
    use crate::event_sourcing::materialize::CurrentStateMaterializer;
    use crate::event_sourcing::store::{
        DeadLetterSink, MemoryDeadLetterSink, MemoryEventStore, MemoryStateStore, StateStore,
    };
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    struct Fixture {
        state: Arc<MemoryStateStore>,
        sink: Arc<MemoryDeadLetterSink>,
        consumer: EventConsumer,
        tenant: Uuid,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(MemoryEventStore::new());
        let state = Arc::new(MemoryStateStore::new());
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let handler = Arc::new(UndeliverableHandler::new(sink.clone()));
        let materializer = Arc::new(CurrentStateMaterializer::<Site>::new(
            events,
            state.clone(),
        ));
        let consumer = EventConsumer::new(handler).with_applier(materializer);
        Fixture {
            state,
            sink,
            consumer,
            tenant: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn poison_message_never_blocks_the_next_event() {
        let fx = fixture();
        let commands = site_commands();
        let root = Uuid::new_v4();

        // Poison first, well-formed second.
        fx.consumer.process_raw(b"{not json").await;

        let create = Event::new(
            root,
            fx.tenant,
            commands.lookup("Create_Site").unwrap(),
            payload_from(&[("name", json!("A"))]),
        );
        fx.consumer
            .process_raw(crate::event_sourcing::core::serialize_event(&create).unwrap().as_bytes())
            .await;

        assert!(fx.state.load("Site", fx.tenant, root).await.unwrap().is_some());

        // Exactly one dead-letter record for the poison message.
        let letters = fx.sink.recent(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].raw_payload.as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn out_of_order_event_is_discarded_not_dead_lettered() {
        let fx = fixture();
        let commands = site_commands();
        let root = Uuid::new_v4();
        let t0 = Utc::now();

        let create = Event::new(
            root,
            fx.tenant,
            commands.lookup("Create_Site").unwrap(),
            payload_from(&[("name", json!("new"))]),
        )
        .at(t0);
        fx.consumer.process(create).await;

        let stale = Event::new(
            root,
            fx.tenant,
            commands.lookup("Update_Site").unwrap(),
            payload_from(&[("name", json!("old"))]),
        )
        .at(t0 - Duration::seconds(30));
        fx.consumer.process(stale).await;

        // Discarded: state keeps the newer value and no dead letter exists.
        let doc = fx.state.load("Site", fx.tenant, root).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("new"));
        assert_eq!(fx.sink.recent(10).await.unwrap().len(), 0);
    }

    struct AlwaysDown;

    #[async_trait]
    impl EventApplier for AlwaysDown {
        fn source_name(&self) -> &str {
            "always-down"
        }
        async fn on_event(&self, _event: &Event) -> Result<(), EsError> {
            Err(EsError::Unavailable("store down".into()))
        }
    }

    #[tokio::test]
    async fn exhausted_transient_retries_are_dead_lettered() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let handler = Arc::new(UndeliverableHandler::new(sink.clone()));
        let mut consumer = EventConsumer::new(handler).with_applier(Arc::new(AlwaysDown));
        consumer.retry = RetryConfig {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            multiplier: 2.0,
        };

        let commands = site_commands();
        let event = Event::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            commands.lookup("Create_Site").unwrap(),
            payload_from(&[]),
        );
        consumer.process(event.clone()).await;

        let letters = sink.recent(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].source, "always-down");
        assert_eq!(letters[0].event.as_ref().unwrap().id, event.id);
    }
}
