//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::language::PrepareError;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the execution environment.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (bad names, missing prerequisites, duplicates).
    #[error("validation error: {0}")]
    Validation(String),

    /// A named command, device binding or invoker does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bus capacity exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Invalid lifecycle transition (double start, restart after stop).
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// User source failed to prepare; carries every collected error.
    #[error("prepare failed for '{name}': {}", summarize(.errors))]
    Prepare {
        name: String,
        errors: Vec<PrepareError>,
    },

    /// The language or component cannot provide the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Host misconfiguration (unknown language implementation, bad config file).
    #[error("config error: {0}")]
    Config(String),

    /// Internal errors, including recovered panics.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(errors: &[PrepareError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn prepare(name: impl Into<String>, errors: Vec<PrepareError>) -> Self {
        Self::Prepare {
            name: name.into(),
            errors,
        }
    }

    /// Host-level faults that must reach the caller instead of being logged
    /// and isolated to a single firing.
    pub fn is_host_fault(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_error_lists_every_problem() {
        let err = Error::prepare(
            "S1",
            vec![
                PrepareError::new("unexpected token", 1, 4),
                PrepareError::new("unknown kind", 3, 1),
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("'S1'"));
        assert!(msg.contains("unexpected token at 1:4"));
        assert!(msg.contains("unknown kind at 3:1"));
    }

    #[test]
    fn test_host_fault_classification() {
        assert!(Error::config("no such language").is_host_fault());
        assert!(!Error::not_found("D1").is_host_fault());
        assert!(!Error::validation("dup").is_host_fault());
    }
}
