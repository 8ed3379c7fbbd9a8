//! Live configuration values.
//!
//! A [`StateValue`] describes the active descendants of a node as a tree:
//!
//! - `Leaf("a")` - the active child is `a`, with nothing below it
//! - `{"a": v}` - the active child of a compound node is `a`, with `v`
//!   describing `a`'s own active descendants
//! - `{"r1": v1, "r2": v2}` - all regions of a parallel node
//!
//! An empty branch as a map value marks a child with no descendants of its
//! own when sibling regions force the map form. Conversions between a value,
//! its root-to-leaf paths, and its active node set are total, and rebuilding
//! a value from its paths reproduces it exactly.

use crate::path::StatePath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A live configuration: the set of active states as a tree-shaped value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// A single active child with nothing below it.
    Leaf(String),
    /// Active children keyed by name.
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// An empty branch (a child with no active descendants).
    pub fn empty() -> Self {
        StateValue::Branch(BTreeMap::new())
    }

    /// True for a branch with no entries.
    pub fn is_empty_branch(&self) -> bool {
        matches!(self, StateValue::Branch(m) if m.is_empty())
    }

    /// Encodes a single root-to-leaf path as a value.
    pub fn from_path(path: &StatePath) -> Self {
        Self::from_paths(&[path.clone()])
    }

    /// Rebuilds a value from a set of root-to-leaf paths.
    ///
    /// Paths sharing a proper prefix keep the deeper form; an empty input
    /// yields an empty branch.
    pub fn from_paths(paths: &[StatePath]) -> Self {
        let slices: Vec<&[String]> = paths.iter().map(|p| p.segments()).collect();
        build_value(&slices)
    }

    /// Decodes the value into its root-to-leaf paths.
    pub fn leaf_paths(&self) -> Vec<StatePath> {
        let mut out = Vec::new();
        collect_leaves(self, &StatePath::root(), &mut out);
        out
    }

    /// The active node set: every leaf path plus every prefix, including the
    /// root.
    pub fn active_nodes(&self) -> BTreeSet<StatePath> {
        let mut out = BTreeSet::new();
        out.insert(StatePath::root());
        for leaf in self.leaf_paths() {
            for depth in 1..=leaf.len() {
                out.insert(leaf.truncate(depth));
            }
        }
        out
    }

    /// True if `path` names an active node.
    pub fn is_active(&self, path: &StatePath) -> bool {
        if path.is_empty() {
            return true;
        }
        self.leaf_paths().iter().any(|leaf| leaf.starts_with(path))
    }

    /// Merges disjoint values into one.
    pub fn merge(values: &[StateValue]) -> Self {
        let mut paths = Vec::new();
        for value in values {
            paths.extend(value.leaf_paths());
        }
        Self::from_paths(&paths)
    }

    /// Matches a query against this value.
    ///
    /// Succeeds iff every leaf path of the query is a prefix of some active
    /// path. An empty query matches everything.
    pub fn matches(&self, query: &StateValue) -> bool {
        let active = self.leaf_paths();
        query
            .leaf_paths()
            .iter()
            .all(|q| active.iter().any(|leaf| leaf.starts_with(q)))
    }

    /// The sub-value describing the active descendants below `path`, if the
    /// path is active and anything lies below it.
    pub fn branch_at(&self, path: &StatePath) -> Option<&StateValue> {
        let mut current = self;
        for segment in path.segments() {
            match current {
                StateValue::Leaf(_) => return None,
                StateValue::Branch(map) => current = map.get(segment)?,
            }
        }
        if current.is_empty_branch() {
            return None;
        }
        Some(current)
    }
}

fn build_value(paths: &[&[String]]) -> StateValue {
    let mut groups: BTreeMap<String, Vec<&[String]>> = BTreeMap::new();
    for path in paths {
        if let Some(head) = path.first() {
            groups.entry(head.clone()).or_default().push(&path[1..]);
        }
    }

    if groups.len() == 1 {
        let (name, rests) = groups.into_iter().next().expect("single group");
        let deeper: Vec<&[String]> = rests.into_iter().filter(|r| !r.is_empty()).collect();
        if deeper.is_empty() {
            return StateValue::Leaf(name);
        }
        let mut map = BTreeMap::new();
        map.insert(name, build_value(&deeper));
        return StateValue::Branch(map);
    }

    let mut map = BTreeMap::new();
    for (name, rests) in groups {
        let deeper: Vec<&[String]> = rests.into_iter().filter(|r| !r.is_empty()).collect();
        let sub = if deeper.is_empty() {
            StateValue::empty()
        } else {
            build_value(&deeper)
        };
        map.insert(name, sub);
    }
    StateValue::Branch(map)
}

fn collect_leaves(value: &StateValue, prefix: &StatePath, out: &mut Vec<StatePath>) {
    match value {
        StateValue::Leaf(name) => out.push(prefix.child(name)),
        StateValue::Branch(map) => {
            if map.is_empty() {
                if !prefix.is_empty() {
                    out.push(prefix.clone());
                }
                return;
            }
            for (name, sub) in map {
                collect_leaves(sub, &prefix.child(name), out);
            }
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::from_path(&StatePath::parse(s))
    }
}
