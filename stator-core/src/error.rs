//! Core error types.

use thiserror::Error;

/// Errors from the statechart core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition at '{path}': {reason}")]
    InvalidDefinition { path: String, reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("unknown state node: '{path}'")]
    UnknownNode { path: String },

    #[error("invalid state value: {reason}")]
    InvalidStateValue { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns a stable code for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::UnknownNode { .. } => "UNKNOWN_NODE",
            CoreError::InvalidStateValue { .. } => "INVALID_STATE_VALUE",
            CoreError::Json(_) => "BAD_JSON",
        }
    }

    pub(crate) fn definition(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
