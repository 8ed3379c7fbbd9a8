//! Target resolution and configuration expansion.
//!
//! Two jobs live here:
//!
//! - **Build time**: resolving target references (absolute, or relative via
//!   an upward sibling search) against the config tree.
//! - **Run time**: expanding a target node into leaf paths (following
//!   `initial` chains, populating parallel regions, restoring history) and
//!   completing partial values so that every compound node has exactly one
//!   active child and every parallel node has all regions present.

use crate::config::StateConfig;
use crate::error::CoreError;
use crate::history::HistoryStore;
use crate::machine::MachineDefinition;
use crate::node::{HistoryFlavor, NodeKind, StateNode};
use crate::path::StatePath;
use crate::value::StateValue;
use std::collections::{BTreeMap, HashMap};

/// Name index over the config tree, used for target resolution before the
/// node tree exists.
pub(crate) struct TreeIndex {
    children: HashMap<StatePath, Vec<String>>,
}

impl TreeIndex {
    pub(crate) fn from_config(root: &StateConfig) -> Self {
        let mut children = HashMap::new();
        index_node(root, StatePath::root(), &mut children);
        Self { children }
    }

    fn has_node(&self, path: &StatePath) -> bool {
        self.children.contains_key(path)
    }

    fn has_child(&self, path: &StatePath, name: &str) -> bool {
        self.children
            .get(path)
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }
}

fn index_node(cfg: &StateConfig, path: StatePath, out: &mut HashMap<StatePath, Vec<String>>) {
    let names: Vec<String> = cfg.states.iter().map(|(name, _)| name.clone()).collect();
    for (name, child) in cfg.states.iter() {
        index_node(child, path.child(name), out);
    }
    out.insert(path, names);
}

/// Resolves a target reference declared on `source`.
///
/// The first segment is searched as a sibling of the source and then of each
/// ancestor in turn; the first matching scope defines the resolution.
/// Otherwise the target is treated as absolute from the machine root. The
/// fully resolved path must name an existing node.
pub(crate) fn resolve_reference(
    index: &TreeIndex,
    source: &StatePath,
    target: &str,
) -> Result<StatePath, CoreError> {
    let segments: Vec<String> = target.split('.').map(|s| s.to_string()).collect();
    if target.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::definition(
            source,
            format!("invalid target '{}'", target),
        ));
    }

    let unresolved = || {
        CoreError::definition(
            source,
            format!("transition target '{}' does not resolve", target),
        )
    };

    // Sibling search upward from the source.
    let mut scope = source.parent();
    while let Some(s) = scope {
        if index.has_child(&s, &segments[0]) {
            let candidate = s.join(&segments);
            return if index.has_node(&candidate) {
                Ok(candidate)
            } else {
                Err(unresolved())
            };
        }
        scope = s.parent();
    }

    // Absolute from the machine root.
    let candidate = StatePath::new(segments);
    if index.has_node(&candidate) {
        Ok(candidate)
    } else {
        Err(unresolved())
    }
}

/// The fully expanded initial configuration of a machine.
pub fn initial_value(def: &MachineDefinition) -> Result<StateValue, CoreError> {
    complete_content(&def.root, None)
}

/// Completes a (possibly partial) value against the definition tree.
///
/// Under-specified compound leaves are expanded through their `initial`
/// chain and missing parallel regions are filled in, which is what upholds
/// the configuration invariants after merging.
pub fn autocomplete(def: &MachineDefinition, value: &StateValue) -> Result<StateValue, CoreError> {
    complete_content(&def.root, Some(value))
}

/// Expands a target node into the leaf paths of its resolved configuration.
///
/// History targets consult the store first, then their declared default
/// target, then the parent's `initial`. Shallow snapshots come back
/// truncated to immediate-child identity; [`autocomplete`] re-resolves the
/// dropped structure.
pub fn expand_target(
    def: &MachineDefinition,
    target: &StatePath,
    history: &HistoryStore,
) -> Result<Vec<StatePath>, CoreError> {
    let node = def.node(target).ok_or_else(|| CoreError::UnknownNode {
        path: target.to_string(),
    })?;

    match node.kind {
        NodeKind::Atomic => Ok(vec![target.clone()]),
        NodeKind::Compound | NodeKind::Parallel => {
            let content = complete_content(node, None)?;
            Ok(content
                .leaf_paths()
                .iter()
                .map(|rel| target.join(rel.segments()))
                .collect())
        }
        NodeKind::History => {
            let parent_path = target.parent().ok_or_else(|| CoreError::UnknownNode {
                path: target.to_string(),
            })?;
            let flavor = node.history.unwrap_or(HistoryFlavor::Shallow);

            if let Some(snapshot) = history.get(&parent_path) {
                let projected = match flavor {
                    HistoryFlavor::Deep => snapshot.clone(),
                    HistoryFlavor::Shallow => shallow_project(snapshot),
                };
                return Ok(projected
                    .leaf_paths()
                    .iter()
                    .map(|rel| parent_path.join(rel.segments()))
                    .collect());
            }

            if let Some(default_target) = &node.history_target {
                return expand_target(def, default_target, history);
            }

            let parent = def.node(&parent_path).ok_or_else(|| CoreError::UnknownNode {
                path: parent_path.to_string(),
            })?;
            let initial = parent.initial.as_deref().ok_or_else(|| {
                CoreError::definition(&parent_path, "history parent has no 'initial'")
            })?;
            expand_target(def, &parent_path.child(initial), history)
        }
    }
}

/// Projects a stored snapshot to immediate-child identity.
///
/// Deeper structure is discarded; restoring the projection re-resolves it
/// through `initial` chains.
pub fn shallow_project(content: &StateValue) -> StateValue {
    match content {
        StateValue::Leaf(name) => StateValue::Leaf(name.clone()),
        StateValue::Branch(map) => match map.keys().next() {
            Some(name) => StateValue::Leaf(name.clone()),
            None => StateValue::empty(),
        },
    }
}

fn initial_of(node: &StateNode) -> Result<String, CoreError> {
    node.initial
        .clone()
        .ok_or_else(|| CoreError::definition(&node.path, "compound state has no 'initial'"))
}

/// Completes the content of `node` (a compound or parallel node), filling
/// gaps from `initial` declarations.
fn complete_content(node: &StateNode, content: Option<&StateValue>) -> Result<StateValue, CoreError> {
    match node.kind {
        NodeKind::Compound => {
            let (child_name, sub): (String, Option<&StateValue>) = match content {
                None => (initial_of(node)?, None),
                Some(StateValue::Leaf(name)) => (name.clone(), None),
                Some(StateValue::Branch(map)) if map.is_empty() => (initial_of(node)?, None),
                Some(StateValue::Branch(map)) if map.len() == 1 => {
                    let (name, sub) = map.iter().next().expect("single entry");
                    let sub = if sub.is_empty_branch() { None } else { Some(sub) };
                    (name.clone(), sub)
                }
                Some(StateValue::Branch(_)) => {
                    return Err(CoreError::InvalidStateValue {
                        reason: format!("multiple active children under compound '{}'", node.path),
                    });
                }
            };

            let child = node.child(&child_name).ok_or_else(|| {
                CoreError::InvalidStateValue {
                    reason: format!("unknown child '{}' under '{}'", child_name, node.path),
                }
            })?;

            match child.kind {
                NodeKind::Atomic => Ok(StateValue::Leaf(child_name)),
                NodeKind::History => Err(CoreError::InvalidStateValue {
                    reason: format!("history state '{}' cannot be active", child.path),
                }),
                NodeKind::Compound | NodeKind::Parallel => {
                    let inner = complete_content(child, sub)?;
                    let mut map = BTreeMap::new();
                    map.insert(child_name, inner);
                    Ok(StateValue::Branch(map))
                }
            }
        }

        NodeKind::Parallel => {
            let mut map = BTreeMap::new();
            for region in &node.children {
                let sub: Option<&StateValue> = match content {
                    Some(StateValue::Branch(m)) => {
                        m.get(&region.name).filter(|v| !v.is_empty_branch())
                    }
                    _ => None,
                };
                let value = match region.kind {
                    NodeKind::Atomic => StateValue::empty(),
                    NodeKind::History => {
                        return Err(CoreError::InvalidStateValue {
                            reason: format!("history state '{}' cannot be a region", region.path),
                        });
                    }
                    NodeKind::Compound | NodeKind::Parallel => complete_content(region, sub)?,
                };
                map.insert(region.name.clone(), value);
            }
            Ok(StateValue::Branch(map))
        }

        NodeKind::Atomic => Ok(StateValue::empty()),
        NodeKind::History => Err(CoreError::InvalidStateValue {
            reason: format!("history state '{}' cannot be active", node.path),
        }),
    }
}
