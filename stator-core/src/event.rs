//! Events.
//!
//! External events carry a type and a JSON payload. The interpreter also
//! synthesises a few internal event types:
//!
//! - `$init` - delivered to entry actions when an actor starts
//! - `$$always` - drives eventless transition selection
//! - `$stop` - delivered to exit actions when an actor stops
//! - `$delay.<key>#<path>` - a delayed transition firing for `(path, key)`
//! - `done.invoke.<id>` / `error.invoke.<id>` - invocation completion

use crate::path::StatePath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Synthesised event type for actor start.
pub const INIT_EVENT: &str = "$init";
/// Synthesised event type driving eventless transitions.
pub const ALWAYS_EVENT: &str = "$$always";
/// Synthesised event type for actor stop.
pub const STOP_EVENT: &str = "$stop";
/// Prefix of delayed transition event types.
pub const DELAY_PREFIX: &str = "$delay.";

/// An event delivered to an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, matched against `on` maps.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    /// Creates an event with a null payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Value::Null,
        }
    }

    /// Creates an event with a payload.
    pub fn with_payload(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    pub fn always() -> Self {
        Self::new(ALWAYS_EVENT)
    }

    pub fn stop() -> Self {
        Self::new(STOP_EVENT)
    }

    /// The delayed transition event for `(path, key)`.
    pub fn delay(path: &StatePath, key: &str) -> Self {
        Self::new(format!("{}{}#{}", DELAY_PREFIX, key, path))
    }

    /// The completion event type for an invocation id.
    pub fn done_invoke_type(id: &str) -> String {
        format!("done.invoke.{}", id)
    }

    /// The failure event type for an invocation id.
    pub fn error_invoke_type(id: &str) -> String {
        format!("error.invoke.{}", id)
    }

    /// Completion event of an invocation, carrying its output.
    pub fn done_invoke(id: &str, output: Value) -> Self {
        Self::with_payload(Self::done_invoke_type(id), output)
    }

    /// Failure event of an invocation, carrying the error value.
    pub fn error_invoke(id: &str, error: Value) -> Self {
        Self::with_payload(Self::error_invoke_type(id), error)
    }

    pub fn is_always(&self) -> bool {
        self.event_type == ALWAYS_EVENT
    }

    /// Decodes a delayed transition event into `(key, path)`.
    pub fn as_delay(&self) -> Option<(String, StatePath)> {
        let rest = self.event_type.strip_prefix(DELAY_PREFIX)?;
        let (key, path) = rest.split_once('#')?;
        Some((key.to_string(), StatePath::parse(path)))
    }
}

impl From<&str> for Event {
    fn from(event_type: &str) -> Self {
        Self::new(event_type)
    }
}

impl From<String> for Event {
    fn from(event_type: String) -> Self {
        Self::new(event_type)
    }
}
