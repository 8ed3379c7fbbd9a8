//! Machine definition building and validation.
//!
//! [`MachineDefinition::from_config`] turns a configuration into an immutable
//! validated node tree:
//!
//! - kinds are inferred (`states` present -> compound) unless declared
//! - every compound node has an `initial` naming an existing, non-history child
//! - history nodes require a compound parent and carry no behavior
//! - every transition target is resolved to an absolute path
//! - guards are parsed (inline expressions) or classified (named references)
//! - `invoke.onDone` / `invoke.onError` are rewritten into the declaring
//!   node's `on` map under `done.invoke.<id>` / `error.invoke.<id>`
//!
//! Violations surface as [`CoreError::InvalidDefinition`] carrying the dotted
//! path of the offending node; nothing is re-checked at runtime.

use crate::config::{MachineConfig, StateConfig, TransitionList};
use crate::error::CoreError;
use crate::event::Event;
use crate::guard::GuardDef;
use crate::node::{HistoryFlavor, InvokeDef, NodeKind, StateNode, TransitionDef};
use crate::path::StatePath;
use crate::target::{resolve_reference, TreeIndex};
use serde_json::{json, Value};
use std::collections::HashSet;

/// An immutable, validated machine definition.
///
/// Definitions are cheap to share; every actor spawned from the same
/// definition reads the same tree.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    /// Machine id, used in logs and generated actor ids.
    pub id: String,

    /// Initial context value (an empty object when the config omits it).
    pub context: Value,

    /// Root of the state tree.
    pub root: StateNode,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        Self::from_config(&MachineConfig::from_json(json)?)
    }

    /// Validates a parsed configuration.
    pub fn from_config(config: &MachineConfig) -> Result<Self, CoreError> {
        Builder::new(config).build()
    }

    /// Looks up a node by absolute path.
    pub fn node(&self, path: &StatePath) -> Option<&StateNode> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Document-order sort key for a path (index of each segment among its
    /// parent's children).
    pub fn doc_order_key(&self, path: &StatePath) -> Vec<usize> {
        let mut key = Vec::with_capacity(path.len());
        let mut node = &self.root;
        for segment in path.segments() {
            match node.child_index(segment) {
                Some(index) => {
                    key.push(index);
                    node = &node.children[index];
                }
                None => {
                    key.push(usize::MAX);
                    return key;
                }
            }
        }
        key
    }
}

struct Builder<'a> {
    config: &'a MachineConfig,
    index: TreeIndex,
    invoke_ids: HashSet<String>,
}

impl<'a> Builder<'a> {
    fn new(config: &'a MachineConfig) -> Self {
        Self {
            index: TreeIndex::from_config(&config.root),
            config,
            invoke_ids: HashSet::new(),
        }
    }

    fn build(mut self) -> Result<MachineDefinition, CoreError> {
        let config = self.config;
        if config.root.states.is_empty() {
            return Err(CoreError::definition("", "machine root must declare states"));
        }

        let root = self.build_node(String::new(), StatePath::root(), &config.root, None)?;

        let context = if config.context.is_null() {
            json!({})
        } else {
            config.context.clone()
        };

        Ok(MachineDefinition {
            id: config.id.clone().unwrap_or_else(|| "machine".to_string()),
            context,
            root,
        })
    }

    fn build_node(
        &mut self,
        name: String,
        path: StatePath,
        cfg: &StateConfig,
        parent_kind: Option<NodeKind>,
    ) -> Result<StateNode, CoreError> {
        let kind = infer_kind(cfg);

        match kind {
            NodeKind::History => {
                if parent_kind != Some(NodeKind::Compound) {
                    return Err(CoreError::definition(
                        &path,
                        "history state requires a compound parent",
                    ));
                }
                if !cfg.states.is_empty()
                    || !cfg.on.is_empty()
                    || !cfg.always.is_empty()
                    || !cfg.after.is_empty()
                    || !cfg.entry.is_empty()
                    || !cfg.exit.is_empty()
                    || !cfg.invoke.is_empty()
                {
                    return Err(CoreError::definition(
                        &path,
                        "history state cannot declare children or behavior",
                    ));
                }
            }
            NodeKind::Compound => {
                if cfg.states.is_empty() {
                    return Err(CoreError::definition(
                        &path,
                        "compound state must declare states",
                    ));
                }
                let initial = cfg.initial.as_deref().ok_or_else(|| {
                    CoreError::definition(&path, "compound state with children requires 'initial'")
                })?;
                match cfg.states.get(initial) {
                    None => {
                        return Err(CoreError::definition(
                            &path,
                            format!("initial state '{}' is not a declared child", initial),
                        ));
                    }
                    Some(child) if infer_kind(child) == NodeKind::History => {
                        return Err(CoreError::definition(
                            &path,
                            format!("initial state '{}' cannot be a history state", initial),
                        ));
                    }
                    Some(_) => {}
                }
            }
            NodeKind::Parallel => {
                if cfg.states.is_empty() {
                    return Err(CoreError::definition(
                        &path,
                        "parallel state must declare regions",
                    ));
                }
                if cfg.initial.is_some() {
                    return Err(CoreError::definition(
                        &path,
                        "parallel state cannot declare 'initial'",
                    ));
                }
            }
            NodeKind::Atomic => {
                if cfg.initial.is_some() {
                    return Err(CoreError::definition(
                        &path,
                        "'initial' requires child states",
                    ));
                }
            }
        }

        if kind != NodeKind::History {
            if cfg.history.is_some() {
                return Err(CoreError::definition(
                    &path,
                    "'history' is only valid on history states",
                ));
            }
            if cfg.target.is_some() {
                return Err(CoreError::definition(
                    &path,
                    "'target' is only valid on history states",
                ));
            }
        }

        let history_target = match &cfg.target {
            Some(raw) => Some(resolve_reference(&self.index, &path, raw)?),
            None => None,
        };

        let mut on: Vec<(String, Vec<TransitionDef>)> = Vec::new();
        for (event_type, list) in cfg.on.iter() {
            on.push((event_type.clone(), self.build_transitions(&path, list)?));
        }

        let always = self.build_transitions(&path, &cfg.always)?;

        let mut after = Vec::new();
        for (key, list) in cfg.after.iter() {
            after.push((key.clone(), self.build_transitions(&path, list)?));
        }

        let mut invoke = Vec::new();
        for (index, inv) in cfg.invoke.0.iter().enumerate() {
            let id = inv
                .id
                .clone()
                .unwrap_or_else(|| format!("{}:invoke[{}]", path, index));
            if !self.invoke_ids.insert(id.clone()) {
                return Err(CoreError::definition(
                    &path,
                    format!("duplicate invocation id '{}'", id),
                ));
            }

            if !inv.on_done.is_empty() {
                let descs = self.build_transitions(&path, &inv.on_done)?;
                push_on(&mut on, Event::done_invoke_type(&id), descs);
            }
            if !inv.on_error.is_empty() {
                let descs = self.build_transitions(&path, &inv.on_error)?;
                push_on(&mut on, Event::error_invoke_type(&id), descs);
            }
            let has_error_handler = on
                .iter()
                .any(|(event_type, _)| *event_type == Event::error_invoke_type(&id));

            invoke.push(InvokeDef {
                id,
                src: inv.src.clone(),
                input: inv.input.clone(),
                has_error_handler,
            });
        }

        let mut children = Vec::new();
        for (child_name, child_cfg) in cfg.states.iter() {
            children.push(self.build_node(
                child_name.clone(),
                path.child(child_name),
                child_cfg,
                Some(kind),
            )?);
        }

        Ok(StateNode {
            name,
            path,
            kind,
            initial: cfg.initial.clone(),
            history: match kind {
                NodeKind::History => Some(cfg.history.unwrap_or(HistoryFlavor::Shallow)),
                _ => None,
            },
            history_target,
            on,
            always,
            after,
            entry: cfg.entry.0.clone(),
            exit: cfg.exit.0.clone(),
            invoke,
            children,
        })
    }

    fn build_transitions(
        &self,
        path: &StatePath,
        list: &TransitionList,
    ) -> Result<Vec<TransitionDef>, CoreError> {
        let mut out = Vec::new();
        for t in list.iter() {
            let target = match &t.target {
                Some(raw) => Some(resolve_reference(&self.index, path, raw)?),
                None => None,
            };
            let guard = match &t.guard {
                Some(raw) => Some(GuardDef::parse(raw).map_err(|e| {
                    CoreError::definition(path, format!("invalid guard '{}': {}", raw, e))
                })?),
                None => None,
            };
            out.push(TransitionDef {
                target,
                actions: t.actions.0.clone(),
                guard,
            });
        }
        Ok(out)
    }
}

fn infer_kind(cfg: &StateConfig) -> NodeKind {
    use crate::config::KindConfig;
    match cfg.kind {
        Some(KindConfig::Atomic) => NodeKind::Atomic,
        Some(KindConfig::Compound) => NodeKind::Compound,
        Some(KindConfig::Parallel) => NodeKind::Parallel,
        Some(KindConfig::History) => NodeKind::History,
        None => {
            if cfg.states.is_empty() {
                NodeKind::Atomic
            } else {
                NodeKind::Compound
            }
        }
    }
}

fn push_on(on: &mut Vec<(String, Vec<TransitionDef>)>, event_type: String, descs: Vec<TransitionDef>) {
    if let Some((_, existing)) = on.iter_mut().find(|(t, _)| *t == event_type) {
        existing.extend(descs);
    } else {
        on.push((event_type, descs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(json: Value) -> Result<MachineDefinition, CoreError> {
        MachineDefinition::from_json(&json)
    }

    #[test]
    fn test_minimal_machine() {
        let def = build(json!({
            "id": "toggle",
            "initial": "inactive",
            "states": {"inactive": {}, "active": {}}
        }))
        .unwrap();

        assert_eq!(def.id, "toggle");
        assert_eq!(def.root.kind, NodeKind::Compound);
        assert_eq!(def.root.children.len(), 2);
        assert_eq!(def.context, json!({}));

        let inactive = def.node(&StatePath::parse("inactive")).unwrap();
        assert!(inactive.is_atomic());
    }

    #[test]
    fn test_missing_initial() {
        let err = build(json!({
            "states": {"a": {}, "b": {}}
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { ref path, .. } if path.is_empty()));
        assert!(err.to_string().contains("initial"));
    }

    #[test]
    fn test_undangling_initial() {
        let err = build(json!({
            "initial": "missing",
            "states": {"a": {}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_initial_cannot_be_history() {
        let err = build(json!({
            "initial": "hist",
            "states": {"a": {}, "hist": {"type": "history"}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("history"));
    }

    #[test]
    fn test_history_requires_compound_parent() {
        let err = build(json!({
            "type": "parallel",
            "states": {
                "r1": {"initial": "a", "states": {"a": {}}},
                "hist": {"type": "history"}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { ref path, .. } if path == "hist"));
    }

    #[test]
    fn test_history_cannot_carry_behavior() {
        let err = build(json!({
            "initial": "a",
            "states": {
                "a": {},
                "hist": {"type": "history", "on": {"X": "a"}}
            }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("history state"));
    }

    #[test]
    fn test_unresolvable_target() {
        let err = build(json!({
            "initial": "a",
            "states": {"a": {"on": {"GO": "nowhere"}}}
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { ref path, .. } if path == "a"));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_sibling_target_resolution() {
        let def = build(json!({
            "initial": "parent",
            "states": {
                "parent": {
                    "initial": "a",
                    "states": {
                        "a": {"on": {"NEXT": "b"}},
                        "b": {"on": {"UP": "other"}}
                    }
                },
                "other": {}
            }
        }))
        .unwrap();

        let a = def.node(&StatePath::parse("parent.a")).unwrap();
        let next = a.transitions_for("NEXT").unwrap();
        assert_eq!(next[0].target, Some(StatePath::parse("parent.b")));

        // First segment matches a sibling of an ancestor.
        let b = def.node(&StatePath::parse("parent.b")).unwrap();
        let up = b.transitions_for("UP").unwrap();
        assert_eq!(up[0].target, Some(StatePath::parse("other")));
    }

    #[test]
    fn test_absolute_target_resolution() {
        let def = build(json!({
            "initial": "a",
            "states": {
                "a": {"on": {"DIVE": "b.inner"}},
                "b": {"initial": "inner", "states": {"inner": {}}}
            }
        }))
        .unwrap();

        let a = def.node(&StatePath::parse("a")).unwrap();
        let dive = a.transitions_for("DIVE").unwrap();
        assert_eq!(dive[0].target, Some(StatePath::parse("b.inner")));
    }

    #[test]
    fn test_invoke_normalisation() {
        let def = build(json!({
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {"id": "fetch", "src": "fetchUser",
                               "onDone": "ready", "onError": "failed"}
                },
                "ready": {},
                "failed": {}
            }
        }))
        .unwrap();

        let loading = def.node(&StatePath::parse("loading")).unwrap();
        assert_eq!(loading.invoke.len(), 1);
        assert_eq!(loading.invoke[0].id, "fetch");
        assert!(loading.invoke[0].has_error_handler);

        let done = loading.transitions_for("done.invoke.fetch").unwrap();
        assert_eq!(done[0].target, Some(StatePath::parse("ready")));
        let error = loading.transitions_for("error.invoke.fetch").unwrap();
        assert_eq!(error[0].target, Some(StatePath::parse("failed")));
    }

    #[test]
    fn test_generated_invoke_id() {
        let def = build(json!({
            "initial": "a",
            "states": {"a": {"invoke": {"src": "ticker"}}}
        }))
        .unwrap();

        let a = def.node(&StatePath::parse("a")).unwrap();
        assert_eq!(a.invoke[0].id, "a:invoke[0]");
        assert!(!a.invoke[0].has_error_handler);
    }

    #[test]
    fn test_duplicate_invoke_id() {
        let err = build(json!({
            "initial": "a",
            "states": {
                "a": {"invoke": {"id": "dup", "src": "x"}},
                "b": {"invoke": {"id": "dup", "src": "y"}}
            }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn test_guard_parsing_at_build() {
        let def = build(json!({
            "initial": "a",
            "states": {
                "a": {"on": {
                    "GO": {"target": "b", "guard": "ctx.count < 3"},
                    "JUMP": {"target": "b", "guard": "isReady"}
                }},
                "b": {}
            }
        }))
        .unwrap();

        let a = def.node(&StatePath::parse("a")).unwrap();
        assert!(matches!(
            a.transitions_for("GO").unwrap()[0].guard,
            Some(GuardDef::Expr(_))
        ));
        assert!(matches!(
            a.transitions_for("JUMP").unwrap()[0].guard,
            Some(GuardDef::Named(ref n)) if n == "isReady"
        ));

        let err = build(json!({
            "initial": "a",
            "states": {"a": {"on": {"GO": {"guard": "ctx.bad =="}}}}
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_doc_order_key() {
        let def = build(json!({
            "type": "parallel",
            "states": {
                "zulu": {"initial": "a", "states": {"a": {}, "b": {}}},
                "alpha": {}
            }
        }))
        .unwrap();

        let zulu = def.doc_order_key(&StatePath::parse("zulu"));
        let alpha = def.doc_order_key(&StatePath::parse("alpha"));
        assert!(zulu < alpha);

        let zb = def.doc_order_key(&StatePath::parse("zulu.b"));
        let za = def.doc_order_key(&StatePath::parse("zulu.a"));
        assert!(za < zb);
    }
}
