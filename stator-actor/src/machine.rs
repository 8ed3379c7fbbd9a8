//! Machines: a shared definition plus named implementations.
//!
//! A [`Machine`] pairs an immutable [`MachineDefinition`] with an
//! [`Implementations`] table of named actions, guards, delays, logics and
//! inputs. [`Machine::provide`] overlays additional implementations onto a
//! new machine sharing the same tree, so a definition can be validated once
//! and specialised per deployment.

use crate::actor::{ChildHandle, SpawnOptions};
use crate::effect::Effect;
use crate::error::{ActionError, ActorError};
use crate::logic::ActorLogic;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stator_core::{CoreError, Event, GuardEval, MachineDefinition};

/// A named action implementation.
pub type ActionFn = Arc<dyn Fn(&mut ActionArgs<'_>) -> Result<(), ActionError> + Send + Sync>;

/// A named guard implementation. Guards must be pure.
pub type GuardFn = Arc<dyn Fn(&Value, &Event) -> bool + Send + Sync>;

/// A named dynamic delay, resolved once at scheduling time.
pub type DelayFn = Arc<dyn Fn(&Value, &Event) -> u64 + Send + Sync>;

/// A named input callable for invocations.
pub type InputFn = Arc<dyn Fn(&Value, &Event) -> Value + Send + Sync>;

/// Context initializer, used instead of the configured context value.
pub type ContextFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// A named delay implementation.
#[derive(Clone)]
pub enum DelayImpl {
    /// Fixed millisecond count.
    Fixed(u64),
    /// Computed from context and event at scheduling time.
    Dynamic(DelayFn),
}

/// Named implementations resolved against symbolic references in a machine
/// configuration.
#[derive(Clone, Default)]
pub struct Implementations {
    actions: HashMap<String, ActionFn>,
    guards: HashMap<String, GuardFn>,
    delays: HashMap<String, DelayImpl>,
    logics: HashMap<String, ActorLogic>,
    inputs: HashMap<String, InputFn>,
    context_init: Option<ContextFn>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ActionArgs<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn guard<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Event) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(f));
        self
    }

    /// Registers a fixed named delay in milliseconds.
    pub fn delay(mut self, name: impl Into<String>, ms: u64) -> Self {
        self.delays.insert(name.into(), DelayImpl::Fixed(ms));
        self
    }

    /// Registers a delay computed from context and event at scheduling time.
    pub fn delay_with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Event) -> u64 + Send + Sync + 'static,
    {
        self.delays
            .insert(name.into(), DelayImpl::Dynamic(Arc::new(f)));
        self
    }

    pub fn logic(mut self, name: impl Into<String>, logic: impl Into<ActorLogic>) -> Self {
        self.logics.insert(name.into(), logic.into());
        self
    }

    pub fn input<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Event) -> Value + Send + Sync + 'static,
    {
        self.inputs.insert(name.into(), Arc::new(f));
        self
    }

    /// Registers a context initializer that overrides the configured value.
    pub fn context<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.context_init = Some(Arc::new(f));
        self
    }

    pub(crate) fn get_action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    pub(crate) fn get_delay(&self, name: &str) -> Option<&DelayImpl> {
        self.delays.get(name)
    }

    pub(crate) fn get_logic(&self, name: &str) -> Option<&ActorLogic> {
        self.logics.get(name)
    }

    pub(crate) fn get_input(&self, name: &str) -> Option<&InputFn> {
        self.inputs.get(name)
    }

    pub(crate) fn context_init(&self) -> Option<&ContextFn> {
        self.context_init.as_ref()
    }

    /// Merges `overrides` over `self`, later entries winning.
    fn overlay(&self, overrides: Implementations) -> Implementations {
        let mut merged = self.clone();
        merged.actions.extend(overrides.actions);
        merged.guards.extend(overrides.guards);
        merged.delays.extend(overrides.delays);
        merged.logics.extend(overrides.logics);
        merged.inputs.extend(overrides.inputs);
        if overrides.context_init.is_some() {
            merged.context_init = overrides.context_init;
        }
        merged
    }
}

impl GuardEval for Implementations {
    fn eval_named(&self, name: &str, ctx: &Value, event: &Event) -> bool {
        match self.guards.get(name) {
            Some(guard) => guard(ctx, event),
            None => {
                tracing::warn!("no implementation for guard '{}', treating as true", name);
                true
            }
        }
    }
}

/// An immutable machine: shared definition plus implementations.
#[derive(Clone)]
pub struct Machine {
    definition: Arc<MachineDefinition>,
    implementations: Implementations,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Validates a configuration into a machine with no implementations.
    pub fn build(config: &Value) -> Result<Self, CoreError> {
        Self::build_with(config, Implementations::default())
    }

    /// Validates a configuration into a machine with implementations.
    pub fn build_with(config: &Value, implementations: Implementations) -> Result<Self, CoreError> {
        Ok(Self {
            definition: Arc::new(MachineDefinition::from_json(config)?),
            implementations,
        })
    }

    /// Wraps an already validated definition.
    pub fn from_definition(definition: MachineDefinition, implementations: Implementations) -> Self {
        Self {
            definition: Arc::new(definition),
            implementations,
        }
    }

    /// Returns a new machine sharing this definition with `overrides`
    /// merged over the current implementations.
    pub fn provide(&self, overrides: Implementations) -> Machine {
        Machine {
            definition: Arc::clone(&self.definition),
            implementations: self.implementations.overlay(overrides),
        }
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    pub(crate) fn implementations(&self) -> &Implementations {
        &self.implementations
    }

    /// Resolves the context for a new actor: explicit override, then the
    /// registered context initializer, then the configured value.
    pub(crate) fn initial_context(&self, override_context: Option<Value>) -> Value {
        if let Some(ctx) = override_context {
            return ctx;
        }
        if let Some(init) = self.implementations.context_init() {
            return init();
        }
        self.definition.context.clone()
    }
}

/// Spawning capability handed to actions by the runtime.
pub(crate) trait SpawnHost {
    fn spawn_child(
        &mut self,
        logic: ActorLogic,
        options: SpawnOptions,
    ) -> Result<ChildHandle, ActorError>;
}

/// Arguments passed to action implementations.
///
/// Actions may freely mutate the context copy; the runtime publishes it
/// atomically with the new configuration. Messaging requests are collected
/// as effects and executed after publication, while [`ActionArgs::spawn`]
/// acts immediately.
pub struct ActionArgs<'a> {
    context: &'a mut Value,
    event: &'a Event,
    effects: &'a mut Vec<Effect>,
    host: &'a mut dyn SpawnHost,
}

impl<'a> ActionArgs<'a> {
    pub(crate) fn new(
        context: &'a mut Value,
        event: &'a Event,
        effects: &'a mut Vec<Effect>,
        host: &'a mut dyn SpawnHost,
    ) -> Self {
        Self {
            context,
            event,
            effects,
            host,
        }
    }

    pub fn context(&self) -> &Value {
        self.context
    }

    pub fn context_mut(&mut self) -> &mut Value {
        self.context
    }

    /// The event that triggered this macro-step.
    pub fn event(&self) -> &Event {
        self.event
    }

    /// Requests delivery of an event to a named child (spawned or invoked).
    pub fn send_to(&mut self, id: impl Into<String>, event: impl Into<Event>) {
        self.effects.push(Effect::SendTo {
            id: id.into(),
            event: event.into(),
        });
    }

    /// Requests delivery of an event to the parent actor.
    pub fn send_parent(&mut self, event: impl Into<Event>) {
        self.effects.push(Effect::SendParent {
            event: event.into(),
        });
    }

    /// Registers and synchronously starts a child actor bound to this
    /// actor's lifetime (not to any state). Fails on duplicate ids without
    /// affecting the actor.
    pub fn spawn(
        &mut self,
        logic: impl Into<ActorLogic>,
        options: SpawnOptions,
    ) -> Result<ChildHandle, ActorError> {
        self.host.spawn_child(logic.into(), options)
    }
}
