// ============================================================================
// Actors
// ============================================================================

pub mod undeliverable;

pub use undeliverable::{
    GetDeadLetterStats, GetDeadLetters, RecordUndeliverable, UndeliverableActor,
};
