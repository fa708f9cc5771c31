// ============================================================================
// Event Sourcing Core - Generic Fold Machinery
// ============================================================================
//
// Command descriptors, the persisted event record, and the fold engine.
// Nothing in here knows about a particular backend or domain; storage lives
// in `super::store` and domain types in `crate::domain`.
//
// ============================================================================

pub mod command;
pub mod event;
pub mod projection;
pub mod state;

pub use command::{Command, CommandKind, CommandRegistry};
pub use event::{deserialize_event, payload_from, serialize_event, Event, Payload};
pub use projection::{ProjectionView, SeedContext};
pub use state::{apply, fold, StateView};
