//! Effect descriptors.
//!
//! Actions request inter-actor messages declaratively; the actor executes
//! collected effects after the new configuration, context and history have
//! been published and timers/invocations reconciled.

use stator_core::Event;

/// A declarative request returned by an action.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Deliver an event to a named child (spawned or invoked).
    SendTo { id: String, event: Event },

    /// Deliver an event to the parent actor.
    SendParent { event: Event },
}
