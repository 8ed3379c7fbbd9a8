//! Actor runtime error types.

use stator_core::CoreError;
use thiserror::Error;

/// An error raised by a user action implementation.
///
/// Action errors abort the running macro-step before publication and are
/// returned from `send`; the pre-step snapshot stays current.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Errors from the actor runtime.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("action '{name}' failed: {reason}")]
    Action { name: String, reason: String },

    #[error("duplicate child id '{id}'")]
    DuplicateChildId { id: String },
}

impl ActorError {
    /// Returns a stable code for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            ActorError::Core(e) => e.error_code(),
            ActorError::Action { .. } => "ACTION_FAILED",
            ActorError::DuplicateChildId { .. } => "DUPLICATE_CHILD_ID",
        }
    }
}
