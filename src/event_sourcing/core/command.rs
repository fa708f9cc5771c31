use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EsError;

// ============================================================================
// Command Descriptors & Registry
// ============================================================================
//
// A Command is the named intent behind an event; its kind determines how the
// fold engine treats the event's payload. Commands are compared by NAME, not
// by instance, so registries built independently in different processes
// agree on identity.
//
// ============================================================================

/// Fold semantics of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Establishes a new aggregate identity and merges the payload.
    Create,
    /// Same as Create, but produced by a batch import path.
    BulkCreate,
    /// Merges the payload into an existing aggregate.
    Update,
    /// Tombstones the aggregate. The payload is ignored.
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    name: String,
    kind: CommandKind,
}

impl Command {
    pub fn new(name: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// True when successful application creates a new aggregate identity.
    pub fn is_new(&self) -> bool {
        matches!(self.kind, CommandKind::Create | CommandKind::BulkCreate)
    }
}

// Identity is the name alone. Two descriptors registered in different
// processes must compare equal.
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Command {}

impl std::hash::Hash for Command {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Table of the immutable command descriptors one view type understands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command and return its canonical descriptor.
    pub fn register(&mut self, name: impl Into<String>, kind: CommandKind) -> Command {
        let command = Command::new(name, kind);
        self.commands
            .insert(command.name().to_string(), command.clone());
        command
    }

    /// Engine-side lookup. `None` means "not a command of this view type",
    /// which the fold engine treats as a no-op, not an error.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Caller-side lookup. An unregistered name is a reported error, never
    /// silently defaulted.
    pub fn lookup(&self, name: &str) -> Result<&Command, EsError> {
        self.commands
            .get(name)
            .ok_or_else(|| EsError::UnknownCommand(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}
