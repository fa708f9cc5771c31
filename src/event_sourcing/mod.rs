// ============================================================================
// Event Sourcing Runtime
// ============================================================================
//
// Generic, reusable machinery: commands, events, the fold engine, storage
// traits and backends, rehydration, materialization and the dead-letter
// path. Domain-specific code lives in `crate::domain`.
//
// ============================================================================

pub mod core;
pub mod materialize;
pub mod project;
pub mod rehydrate;
pub mod store;
pub mod undeliverable;

pub use self::core::{
    apply, fold, payload_from, Command, CommandKind, CommandRegistry, Event, Payload,
    ProjectionView, SeedContext, StateView,
};
pub use materialize::{CurrentStateMaterializer, EventApplier, RebuildSummary};
pub use project::ProjectionEngine;
pub use rehydrate::Rehydrator;
pub use undeliverable::UndeliverableHandler;
