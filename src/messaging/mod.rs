// ============================================================================
// Messaging - Broker Integration
// ============================================================================
//
// Publisher side: one topic per command name, keyed by aggregate root so
// the broker preserves per-aggregate order. Consumer side: the typed error
// boundary that keeps poison messages from ever stalling a partition.
//
// ============================================================================

pub mod consumer;
pub mod publisher;

pub use consumer::{run_kafka_consumer, EventConsumer};
pub use publisher::{EventPublisher, KafkaEventPublisher, NullPublisher};
