//! Per-actor history store.
//!
//! Every time a compound or parallel node is exited, the value of its subtree
//! at that moment is recorded under the node's path. History nodes read these
//! snapshots when entered; entries persist until overwritten by a later exit
//! of the same node.

use crate::path::StatePath;
use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshots of exited subtrees, keyed by node path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStore {
    entries: HashMap<StatePath, StateValue>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the subtree value of `path` at exit, overwriting any previous
    /// snapshot.
    pub fn save(&mut self, path: StatePath, value: StateValue) {
        self.entries.insert(path, value);
    }

    /// The most recent snapshot for `path`, if it was ever exited.
    pub fn get(&self, path: &StatePath) -> Option<&StateValue> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
