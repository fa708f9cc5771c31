// ============================================================================
// Storage Layer
// ============================================================================
//
// Backend traits for the event log, the materialized-view containers and
// the dead-letter sink, with ScyllaDB backends for durable deployments and
// in-memory backends for tests and the demo wiring.
//
// ============================================================================

pub mod dead_letters;
pub mod event_store;
pub mod memory;
pub mod state_store;

pub use dead_letters::{DeadLetter, DeadLetterSink, DeadLetterStats, ScyllaDeadLetterSink};
pub use event_store::{EventStore, ScyllaEventStore};
pub use memory::{MemoryDeadLetterSink, MemoryEventStore, MemoryStateStore};
pub use state_store::{ScyllaStateStore, StateStore};
