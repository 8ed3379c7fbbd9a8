//! Machine configuration DSL.
//!
//! Configurations are nested JSON records:
//!
//! ```json
//! {
//!   "id": "traffic",
//!   "context": {"cars": 0},
//!   "initial": "green",
//!   "states": {
//!     "green":  {"after": {"30000": "yellow"}},
//!     "yellow": {"after": {"slow": "red"}},
//!     "red":    {"on": {"TIMER": {"target": "green", "guard": "ctx.cars > 0",
//!                                 "actions": ["resetCount"]}}},
//!     "off":    {"type": "history", "history": "shallow", "target": "green"}
//!   }
//! }
//! ```
//!
//! Transition descriptors may be a bare target string, an object
//! `{target?, actions?, guard?}`, or a list of either. Child declaration
//! order is preserved; it defines document order for parallel regions and
//! delay insertion order.

use crate::error::CoreError;
use crate::node::HistoryFlavor;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Declared node kind. Inferred from the presence of `states` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindConfig {
    Atomic,
    Compound,
    Parallel,
    History,
}

/// A JSON map that preserves declaration order.
#[derive(Debug, Clone)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, V)> {
        self.0.iter()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for MapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(MapVisitor(PhantomData))
    }
}

/// One or more action names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionList(pub Vec<String>);

impl ActionList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl Serialize for ActionList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = ActionList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an action name or list of action names")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ActionList(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut names = Vec::new();
                while let Some(name) = seq.next_element::<String>()? {
                    names.push(name);
                }
                Ok(ActionList(names))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

/// A single transition descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Target path (absolute, relative or sibling). Absent for internal
    /// transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Action names to run between exit and entry actions.
    #[serde(default, skip_serializing_if = "ActionList::is_empty")]
    pub actions: ActionList,

    /// Named guard or inline guard expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl TransitionConfig {
    /// A transition consisting only of a target.
    pub fn to_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }
}

/// One or more transition descriptors.
#[derive(Debug, Clone, Default)]
pub struct TransitionList(pub Vec<TransitionConfig>);

impl TransitionList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransitionConfig> {
        self.0.iter()
    }
}

impl Serialize for TransitionList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Accepts `"target"` or `{target?, actions?, guard?}`.
struct TransitionSpec(TransitionConfig);

impl<'de> Deserialize<'de> for TransitionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecVisitor;

        impl<'de> Visitor<'de> for SpecVisitor {
            type Value = TransitionSpec;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target string or transition object")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TransitionSpec(TransitionConfig::to_target(v)))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let config =
                    TransitionConfig::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
                Ok(TransitionSpec(config))
            }
        }

        deserializer.deserialize_any(SpecVisitor)
    }
}

impl<'de> Deserialize<'de> for TransitionList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = TransitionList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a transition, target string, or list of either")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TransitionList(vec![TransitionConfig::to_target(v)]))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let config =
                    TransitionConfig::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
                Ok(TransitionList(vec![config]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut transitions = Vec::new();
                while let Some(spec) = seq.next_element::<TransitionSpec>()? {
                    transitions.push(spec.0);
                }
                Ok(TransitionList(transitions))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

/// An invocation descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Invocation id; generated from the declaring path when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the logic in the implementations table.
    pub src: String,

    /// Input for the logic. A string naming a registered input callable is
    /// resolved dynamically at start time; any other value is passed as-is.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    /// Transitions taken when the invocation completes.
    #[serde(rename = "onDone", default, skip_serializing_if = "TransitionList::is_empty")]
    pub on_done: TransitionList,

    /// Transitions taken when the invocation fails.
    #[serde(rename = "onError", default, skip_serializing_if = "TransitionList::is_empty")]
    pub on_error: TransitionList,
}

/// One or more invocation descriptors.
#[derive(Debug, Clone, Default)]
pub struct InvokeList(pub Vec<InvokeConfig>);

impl InvokeList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for InvokeList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InvokeList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = InvokeList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an invocation or list of invocations")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let config =
                    InvokeConfig::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
                Ok(InvokeList(vec![config]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut invokes = Vec::new();
                while let Some(config) = seq.next_element::<InvokeConfig>()? {
                    invokes.push(config);
                }
                Ok(InvokeList(invokes))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

/// Configuration of a single state node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Node kind; inferred from `states` when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<KindConfig>,

    /// Initial child name (compound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    /// History flavor (history nodes only; defaults to shallow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryFlavor>,

    /// Default target (history nodes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Event type -> transition descriptors.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub on: OrderedMap<TransitionList>,

    /// Eventless transitions.
    #[serde(default, skip_serializing_if = "TransitionList::is_empty")]
    pub always: TransitionList,

    /// Delay key (milliseconds or named delay) -> transition descriptors.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub after: OrderedMap<TransitionList>,

    /// Entry action names.
    #[serde(default, skip_serializing_if = "ActionList::is_empty")]
    pub entry: ActionList,

    /// Exit action names.
    #[serde(default, skip_serializing_if = "ActionList::is_empty")]
    pub exit: ActionList,

    /// Invocations bound to this node's activation.
    #[serde(default, skip_serializing_if = "InvokeList::is_empty")]
    pub invoke: InvokeList,

    /// Child states in declaration order.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub states: OrderedMap<StateConfig>,
}

/// A complete machine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine id, used in logs and generated actor ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Initial context value.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,

    /// The root state node (including top-level `on` as global transitions).
    #[serde(flatten)]
    pub root: StateConfig,
}

impl MachineConfig {
    /// Parses a machine configuration from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(json.clone())?)
    }

    /// Returns the configuration as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal() {
        let config = MachineConfig::from_json(&json!({
            "initial": "idle",
            "states": {"idle": {}, "busy": {}}
        }))
        .unwrap();

        assert_eq!(config.root.initial.as_deref(), Some("idle"));
        assert_eq!(config.root.states.len(), 2);
        assert!(config.id.is_none());
    }

    #[test]
    fn test_states_preserve_declaration_order() {
        let config = MachineConfig::from_json(&json!({
            "type": "parallel",
            "states": {"zulu": {}, "alpha": {}, "mike": {}}
        }))
        .unwrap();

        let names: Vec<&str> = config.root.states.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn test_transition_forms() {
        let config = MachineConfig::from_json(&json!({
            "initial": "a",
            "states": {
                "a": {"on": {
                    "GO": "b",
                    "STAY": {"actions": "log"},
                    "PICK": [
                        {"target": "b", "guard": "ctx.ready"},
                        "c"
                    ]
                }},
                "b": {},
                "c": {}
            }
        }))
        .unwrap();

        let a = config.root.states.get("a").unwrap();

        let go = a.on.get("GO").unwrap();
        assert_eq!(go.0.len(), 1);
        assert_eq!(go.0[0].target.as_deref(), Some("b"));

        let stay = a.on.get("STAY").unwrap();
        assert!(stay.0[0].target.is_none());
        assert_eq!(stay.0[0].actions.names(), &["log".to_string()]);

        let pick = a.on.get("PICK").unwrap();
        assert_eq!(pick.0.len(), 2);
        assert_eq!(pick.0[0].guard.as_deref(), Some("ctx.ready"));
        assert_eq!(pick.0[1].target.as_deref(), Some("c"));
    }

    #[test]
    fn test_after_preserves_insertion_order() {
        let config = MachineConfig::from_json(&json!({
            "initial": "a",
            "states": {
                "a": {"after": {"200": "b", "100": "c"}},
                "b": {},
                "c": {}
            }
        }))
        .unwrap();

        let a = config.root.states.get("a").unwrap();
        let keys: Vec<&str> = a.after.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["200", "100"]);
    }

    #[test]
    fn test_invoke_forms() {
        let config = MachineConfig::from_json(&json!({
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {"src": "fetchUser", "input": {"user": 7},
                               "onDone": "ready", "onError": "failed"}
                },
                "ready": {},
                "failed": {}
            }
        }))
        .unwrap();

        let loading = config.root.states.get("loading").unwrap();
        assert_eq!(loading.invoke.0.len(), 1);
        let invoke = &loading.invoke.0[0];
        assert_eq!(invoke.src, "fetchUser");
        assert_eq!(invoke.input, json!({"user": 7}));
        assert_eq!(invoke.on_done.0[0].target.as_deref(), Some("ready"));
        assert_eq!(invoke.on_error.0[0].target.as_deref(), Some("failed"));
    }

    #[test]
    fn test_history_node_options() {
        let config = MachineConfig::from_json(&json!({
            "initial": "a",
            "states": {
                "a": {},
                "hist": {"type": "history", "history": "deep", "target": "a"}
            }
        }))
        .unwrap();

        let hist = config.root.states.get("hist").unwrap();
        assert_eq!(hist.kind, Some(KindConfig::History));
        assert_eq!(hist.history, Some(HistoryFlavor::Deep));
        assert_eq!(hist.target.as_deref(), Some("a"));
    }

    #[test]
    fn test_round_trip() {
        let json = json!({
            "id": "order",
            "context": {"paid": false},
            "initial": "created",
            "on": {"CANCEL": "cancelled"},
            "states": {
                "created": {"on": {"PAY": {"target": "paid", "guard": "event.amount > 0"}}},
                "paid": {"entry": ["notify"]},
                "cancelled": {}
            }
        });

        let config = MachineConfig::from_json(&json).unwrap();
        let back = MachineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back.id.as_deref(), Some("order"));
        assert_eq!(back.context, json!({"paid": false}));
        assert!(back.root.on.get("CANCEL").is_some());
        assert_eq!(
            back.root.states.get("paid").unwrap().entry.names(),
            &["notify".to_string()]
        );
    }
}
