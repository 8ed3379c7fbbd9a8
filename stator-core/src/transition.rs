//! Transition resolution.
//!
//! Selection walks every active leaf path from its deepest node up to the
//! root, taking the first descriptor whose guard passes. Distinct leaves
//! (parallel regions) select independently within the same macro-step;
//! identical selections reached through shared ancestors are applied once.
//!
//! Planning turns a selection into the exit set, entry set and next value.
//! The transition domain is the least common ancestor of source and target;
//! a transition whose target lies at or below its source exits the source
//! itself (restart semantics), so its domain is the source's parent.

use crate::error::CoreError;
use crate::event::Event;
use crate::guard::GuardEval;
use crate::history::HistoryStore;
use crate::machine::MachineDefinition;
use crate::node::{NodeKind, TransitionDef};
use crate::path::StatePath;
use crate::target::{autocomplete, expand_target};
use crate::value::StateValue;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

/// A transition picked by selection: the node it was found on and the
/// descriptor itself.
#[derive(Debug, Clone)]
pub struct Selection {
    pub source: StatePath,
    pub transition: TransitionDef,
}

/// Exit set, entry set and resulting configuration for one selection.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    /// Nodes to exit, deepest-first.
    pub exit_set: Vec<StatePath>,

    /// Nodes to enter, shallowest-first.
    pub entry_set: Vec<StatePath>,

    /// The full configuration after this transition.
    pub next_value: StateValue,

    /// Subtree snapshots to record for exited compound/parallel nodes.
    pub history_saves: Vec<(StatePath, StateValue)>,
}

fn guard_passes(
    desc: &TransitionDef,
    ctx: &Value,
    event: &Event,
    guards: &dyn GuardEval,
) -> bool {
    desc.guard
        .as_ref()
        .map(|g| g.evaluate(ctx, event, guards))
        .unwrap_or(true)
}

/// Active leaf paths in document order.
pub fn ordered_leaf_paths(def: &MachineDefinition, value: &StateValue) -> Vec<StatePath> {
    let mut leaves = value.leaf_paths();
    leaves.sort_by_key(|p| def.doc_order_key(p));
    leaves
}

/// Selects the transitions enabled for an event.
///
/// Delay events match only the `after` table of the node at exactly their
/// encoded path; a stale delay whose path is no longer active selects
/// nothing. The `$$always` event matches `always` lists instead of `on`
/// maps.
pub fn select_transitions(
    def: &MachineDefinition,
    value: &StateValue,
    ctx: &Value,
    event: &Event,
    guards: &dyn GuardEval,
) -> Vec<Selection> {
    if let Some((key, path)) = event.as_delay() {
        if !value.is_active(&path) {
            return Vec::new();
        }
        let Some(node) = def.node(&path) else {
            return Vec::new();
        };
        let Some(descs) = node.after_for(&key) else {
            return Vec::new();
        };
        for desc in descs {
            if guard_passes(desc, ctx, event, guards) {
                return vec![Selection {
                    source: path,
                    transition: desc.clone(),
                }];
            }
        }
        return Vec::new();
    }

    let always = event.is_always();
    let mut selections = Vec::new();
    let mut seen: HashSet<(StatePath, usize)> = HashSet::new();

    for leaf in ordered_leaf_paths(def, value) {
        'levels: for depth in (0..=leaf.len()).rev() {
            let node_path = leaf.truncate(depth);
            let Some(node) = def.node(&node_path) else {
                continue;
            };
            let descs: &[TransitionDef] = if always {
                node.always.as_slice()
            } else {
                match node.transitions_for(&event.event_type) {
                    Some(descs) => descs,
                    None => continue,
                }
            };
            for (index, desc) in descs.iter().enumerate() {
                if guard_passes(desc, ctx, event, guards) {
                    if seen.insert((node_path.clone(), index)) {
                        selections.push(Selection {
                            source: node_path,
                            transition: desc.clone(),
                        });
                    }
                    break 'levels;
                }
            }
        }
    }

    selections
}

/// True if any transition is enabled for the event (a dry run of selection;
/// guards are assumed pure).
pub fn can_handle(
    def: &MachineDefinition,
    value: &StateValue,
    ctx: &Value,
    event: &Event,
    guards: &dyn GuardEval,
) -> bool {
    !select_transitions(def, value, ctx, event, guards).is_empty()
}

/// Computes the exit set, entry set and next configuration for a selection.
pub fn plan_transition(
    def: &MachineDefinition,
    value: &StateValue,
    selection: &Selection,
    history: &HistoryStore,
) -> Result<TransitionPlan, CoreError> {
    let Some(target) = &selection.transition.target else {
        // Internal transition: actions only.
        return Ok(TransitionPlan {
            exit_set: Vec::new(),
            entry_set: Vec::new(),
            next_value: value.clone(),
            history_saves: Vec::new(),
        });
    };
    let source = &selection.source;

    // Transition domain. A target at or below the source exits the source
    // itself so that self-transitions re-initialise their children.
    let lca = if !source.is_empty() && target.starts_with(source) {
        source.parent().unwrap_or_default()
    } else {
        source.common_prefix(target)
    };

    let lca_node = def.node(&lca).ok_or_else(|| CoreError::UnknownNode {
        path: lca.to_string(),
    })?;

    // Branches under the domain whose content is being replaced.
    let mut removed: Vec<StatePath> = Vec::new();
    if target == &lca {
        removed.push(lca.clone());
    } else {
        removed.push(lca.child(&target.segments()[lca.len()]));
        match lca_node.kind {
            NodeKind::Parallel => {
                // Only the source and target regions are affected.
                if source.is_strict_descendant_of(&lca) {
                    let source_branch = lca.child(&source.segments()[lca.len()]);
                    if !removed.contains(&source_branch) {
                        removed.push(source_branch);
                    }
                }
            }
            _ => {
                // Compound domain: its single active branch is replaced.
                if let Some(content) = value.branch_at(&lca) {
                    let names: Vec<String> = match content {
                        StateValue::Leaf(name) => vec![name.clone()],
                        StateValue::Branch(map) => map.keys().cloned().collect(),
                    };
                    for name in names {
                        let branch = lca.child(&name);
                        if !removed.contains(&branch) {
                            removed.push(branch);
                        }
                    }
                }
            }
        }
    }

    let prior_leaves = value.leaf_paths();
    let kept: Vec<StatePath> = prior_leaves
        .iter()
        .filter(|leaf| !removed.iter().any(|r| leaf.starts_with(r)))
        .cloned()
        .collect();

    let expansion = expand_target(def, target, history)?;
    let mut all_paths = kept;
    all_paths.extend(expansion);
    let next_value = autocomplete(def, &StateValue::from_paths(&all_paths))?;

    // Exit set: active nodes strictly below the domain on replaced branches.
    let mut exited: BTreeSet<StatePath> = BTreeSet::new();
    for leaf in &prior_leaves {
        if removed.iter().any(|r| leaf.starts_with(r)) {
            for depth in (lca.len() + 1)..=leaf.len() {
                exited.insert(leaf.truncate(depth));
            }
        }
    }
    let mut exit_set: Vec<StatePath> = exited.into_iter().collect();
    exit_set.sort_by_key(|p| (Reverse(p.len()), def.doc_order_key(p)));

    // Entry set: new nodes below the domain that were not continuously
    // active (re-entered nodes are entered again).
    let prior_active = value.active_nodes();
    let new_active = next_value.active_nodes();
    let exit_lookup: HashSet<&StatePath> = exit_set.iter().collect();
    let mut entry_set: Vec<StatePath> = new_active
        .iter()
        .filter(|p| {
            p.is_strict_descendant_of(&lca)
                && !(prior_active.contains(*p) && !exit_lookup.contains(*p))
        })
        .cloned()
        .collect();
    entry_set.sort_by_key(|p| (p.len(), def.doc_order_key(p)));

    // Snapshot exited compound/parallel subtrees for history.
    let mut history_saves = Vec::new();
    for path in &exit_set {
        if let Some(node) = def.node(path) {
            if matches!(node.kind, NodeKind::Compound | NodeKind::Parallel) {
                if let Some(content) = value.branch_at(path) {
                    history_saves.push((path.clone(), content.clone()));
                }
            }
        }
    }

    Ok(TransitionPlan {
        exit_set,
        entry_set,
        next_value,
        history_saves,
    })
}
