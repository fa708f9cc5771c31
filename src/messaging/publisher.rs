use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::sync::Arc;

use crate::error::EsError;
use crate::event_sourcing::core::{serialize_event, Event};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Event Publisher
// ============================================================================
//
// Forwards newly appended events to the broker: one topic per command name,
// message key = aggregate root id so the broker serializes delivery per
// aggregate, body = the serialized event document.
//
// ============================================================================

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), EsError>;
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str) -> Result<Self, EsError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| EsError::Unavailable(format!("kafka producer: {e}")))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: std::time::Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(cb_config),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn update_circuit_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_circuit_state(self.circuit_breaker.state().await.as_gauge());
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &Event) -> Result<(), EsError> {
        let topic = event.command.clone();
        let key = event.aggregate_root_id.to_string();
        let body = serialize_event(event).map_err(|e| EsError::Malformed(e.to_string()))?;

        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&topic).key(&key).payload(&body);
                self.producer
                    .send(
                        record,
                        rdkafka::util::Timeout::After(std::time::Duration::from_secs(5)),
                    )
                    .await
                    .map_err(|(e, _)| EsError::Unavailable(format!("kafka send: {e}")))?;
                Ok::<(), EsError>(())
            })
            .await;

        self.update_circuit_gauge().await;

        match result {
            Ok(()) => {
                tracing::info!(
                    topic = %topic,
                    key = %key,
                    event_id = %event.id,
                    "published event"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish(&topic);
                }
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %topic, "circuit open, broker unavailable");
                Err(EsError::Unavailable("broker circuit open".into()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(topic = %topic, error = %e, "publish failed");
                Err(e)
            }
        }
    }
}

/// Store-only wiring: appended events are not forwarded anywhere.
#[derive(Default)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, event: &Event) -> Result<(), EsError> {
        tracing::trace!(event_id = %event.id, "publisher disabled, event not forwarded");
        Ok(())
    }
}
