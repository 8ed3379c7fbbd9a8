//! Actor snapshots.

use crate::machine::Machine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stator_core::{can_handle, Event, StateValue};

/// Lifecycle state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    /// Created but not started.
    Created,
    /// Processing events.
    Running,
    /// Stopped; events are dropped.
    Stopped,
}

/// An immutable point-in-time view of an actor.
///
/// Observers receive a snapshot after every macro-step including start;
/// `value` and `context` never show a mid-step state.
#[derive(Clone, Serialize)]
pub struct Snapshot {
    /// Active configuration.
    pub value: StateValue,

    /// Context at the end of the macro-step.
    pub context: Value,

    /// Actor lifecycle state.
    pub status: ActorStatus,

    #[serde(skip)]
    machine: Machine,
}

impl Snapshot {
    pub(crate) fn new(value: StateValue, context: Value, status: ActorStatus, machine: Machine) -> Self {
        Self {
            value,
            context,
            status,
            machine,
        }
    }

    /// Matches a dotted state query against the active configuration.
    ///
    /// Succeeds iff the query path is a prefix of some active path.
    pub fn matches(&self, query: &str) -> bool {
        self.value.matches(&StateValue::from(query))
    }

    /// Matches a nested state-value query.
    pub fn matches_value(&self, query: &StateValue) -> bool {
        self.value.matches(query)
    }

    /// True if some transition is enabled for the event (a dry run of
    /// selection; guards must be pure).
    pub fn can(&self, event: &Event) -> bool {
        can_handle(
            self.machine.definition(),
            &self.value,
            &self.context,
            event,
            self.machine.implementations(),
        )
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("value", &self.value)
            .field("context", &self.context)
            .field("status", &self.status)
            .finish()
    }
}
