//! Configuration-time kernel errors.

use std::fmt;

use thiserror::Error;

/// A dependency edge whose target has no descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEdge {
    pub requester: String,
    pub missing: String,
}

impl MissingEdge {
    pub fn new(requester: impl Into<String>, missing: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            missing: missing.into(),
        }
    }
}

impl fmt::Display for MissingEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requires {}", self.requester, self.missing)
    }
}

/// An alias claimed by more than one system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasConflict {
    pub alias: String,
    pub systems: Vec<String>,
}

impl fmt::Display for AliasConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' claimed by {}", self.alias, self.systems.join(", "))
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that make the system graph unusable.
///
/// All of these are fatal to startup. Variants that can involve more than
/// one offender carry the complete list.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Dependency cycle detected among: {}", .systems.join(", "))]
    DependencyCycle { systems: Vec<String> },

    #[error("Missing dependency: {}", list(.edges))]
    MissingDependency { edges: Vec<MissingEdge> },

    #[error("Duplicate alias: {}", list(.conflicts))]
    DuplicateAlias { conflicts: Vec<AliasConflict> },

    #[error("System already registered: {0}")]
    DuplicateRegistration(String),

    #[error("Unsatisfied dependency: {system} requires {}", .missing.join(", "))]
    UnsatisfiedDependency { system: String, missing: Vec<String> },

    #[error("Invalid kernel state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    #[error("System not found: {0}")]
    NotFound(String),
}
