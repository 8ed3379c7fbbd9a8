//! Validated state node tree.
//!
//! [`StateNode`]s are produced from a [`crate::config::MachineConfig`] by the
//! builder in [`crate::machine`]. All transition targets are resolved to
//! absolute paths and all guards are parsed at build time, so the tree is
//! immutable and cheap to share between actors.

use crate::guard::GuardDef;
use crate::path::StatePath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Atomic,
    Compound,
    Parallel,
    History,
}

/// History flavor of a history node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFlavor {
    Shallow,
    Deep,
}

/// A transition with its target resolved and its guard parsed.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    /// Absolute target path. `None` for internal transitions.
    pub target: Option<StatePath>,

    /// Action names, run between exit and entry actions.
    pub actions: Vec<String>,

    /// Optional guard.
    pub guard: Option<GuardDef>,
}

/// A normalised invocation descriptor.
#[derive(Debug, Clone)]
pub struct InvokeDef {
    /// Invocation id; unique across the machine.
    pub id: String,

    /// Name of the logic in the implementations table.
    pub src: String,

    /// Input value; a string naming a registered input callable is resolved
    /// at start time.
    pub input: Value,

    /// Whether an `error.invoke.<id>` handler was registered at build time.
    pub has_error_handler: bool,
}

/// A node in the state tree.
#[derive(Debug, Clone)]
pub struct StateNode {
    /// Node name (final path segment; empty for the root).
    pub name: String,

    /// Absolute path of this node.
    pub path: StatePath,

    pub kind: NodeKind,

    /// Initial child name (compound only).
    pub initial: Option<String>,

    /// History flavor (history nodes; defaults to shallow).
    pub history: Option<HistoryFlavor>,

    /// Resolved default target (history nodes).
    pub history_target: Option<StatePath>,

    /// Event type -> transitions, in declaration order per event.
    pub on: Vec<(String, Vec<TransitionDef>)>,

    /// Eventless transitions.
    pub always: Vec<TransitionDef>,

    /// Delay key -> transitions, in declaration order.
    pub after: Vec<(String, Vec<TransitionDef>)>,

    /// Entry action names.
    pub entry: Vec<String>,

    /// Exit action names.
    pub exit: Vec<String>,

    /// Invocations bound to this node's activation.
    pub invoke: Vec<InvokeDef>,

    /// Children in declaration order.
    pub children: Vec<StateNode>,
}

impl StateNode {
    pub fn is_atomic(&self) -> bool {
        self.kind == NodeKind::Atomic
    }

    pub fn is_compound(&self) -> bool {
        self.kind == NodeKind::Compound
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == NodeKind::Parallel
    }

    pub fn is_history(&self) -> bool {
        self.kind == NodeKind::History
    }

    /// Looks up a direct child by name.
    pub fn child(&self, name: &str) -> Option<&StateNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Index of a direct child in declaration order.
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }

    /// Transitions registered for an event type.
    pub fn transitions_for(&self, event_type: &str) -> Option<&[TransitionDef]> {
        self.on
            .iter()
            .find(|(t, _)| t == event_type)
            .map(|(_, descs)| descs.as_slice())
    }

    /// Transitions registered for a delay key.
    pub fn after_for(&self, key: &str) -> Option<&[TransitionDef]> {
        self.after
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, descs)| descs.as_slice())
    }
}
