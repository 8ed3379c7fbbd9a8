//! The actor runtime.
//!
//! An [`Actor`] is a cheaply cloneable handle over shared internals. `send`
//! is synchronous: the event is enqueued and, unless a drain is already in
//! progress on the stack, the mailbox is drained to quiescence before `send`
//! returns. Timers, invoked children and observers enqueue through the same
//! mailbox, so re-entrant sends are serialised rather than recursive.
//!
//! A macro-step runs under the state lock: select transitions, snapshot
//! exited subtrees into history, run exit actions deepest-first, transition
//! actions, entry actions shallowest-first, publish value/context/history
//! atomically, reconcile timers and invocations against the entered and
//! exited nodes, execute collected effects, then chase eventless transitions
//! until quiescence. Observers are notified once per macro-step, after the
//! lock is released.
//!
//! Timers and invoked children require a tokio runtime; start and send must
//! be called within one. Actions must not call their own actor's handle
//! methods synchronously (use effects instead).

use crate::effect::Effect;
use crate::error::ActorError;
use crate::invoke::{start_adapter, Invocations, RunningInvocation};
use crate::logic::ActorLogic;
use crate::machine::{ActionArgs, Implementations, Machine, SpawnHost};
use crate::observer::{Observers, Subscription};
use crate::snapshot::{ActorStatus, Snapshot};
use crate::timer::Timers;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stator_core::{
    plan_transition, select_transitions, target, Event, HistoryStore, MachineDefinition,
    StatePath, StateValue,
};

/// Safety cap on the eventless closure.
const MAX_EVENTLESS_ITERATIONS: usize = 100;

/// One-way event sink towards a parent actor.
pub type ParentSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Generator for actor and subscription ids. Injectable for deterministic
/// replay; defaults to uuid v4.
pub type IdProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Options for [`spawn_actor`].
#[derive(Clone)]
pub struct ActorOptions {
    /// Actor id; generated from the machine id when absent.
    pub id: Option<String>,

    /// Context override, taking precedence over the machine's context.
    pub context: Option<Value>,

    /// Sink receiving events sent with `send_parent`.
    pub parent: Option<ParentSink>,

    /// Id generator; defaults to uuid v4.
    pub id_provider: Option<IdProvider>,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            id: None,
            context: None,
            parent: None,
            id_provider: None,
        }
    }
}

/// Options for [`ActionArgs::spawn`].
#[derive(Clone, Default)]
pub struct SpawnOptions {
    /// Child id; generated when absent. Duplicate ids fail the spawn.
    pub id: Option<String>,

    /// Input: context override for machine logic, input value for promise
    /// and callback logic.
    pub input: Option<Value>,
}

/// A child registered with an actor: a spawned/invoked machine actor or a
/// promise/callback adapter.
#[derive(Clone)]
pub(crate) enum ChildRef {
    Spawned(Actor),
    Invoked(Arc<RunningInvocation>),
}

/// Handle to a spawned child.
pub struct ChildHandle {
    id: String,
    child: ChildRef,
}

impl ChildHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends an event to the child. For callback children this feeds the
    /// `receive` listeners.
    pub fn send(&self, event: impl Into<Event>) -> Result<(), ActorError> {
        match &self.child {
            ChildRef::Spawned(actor) => actor.send(event),
            ChildRef::Invoked(handle) => {
                handle.deliver(&event.into());
                Ok(())
            }
        }
    }

    pub fn stop(&self) {
        match &self.child {
            ChildRef::Spawned(actor) => actor.stop(),
            ChildRef::Invoked(handle) => handle.stop(),
        }
    }

    /// A snapshot of the child. Adapter children (promise/callback) carry no
    /// configuration and return `None`.
    pub fn get_snapshot(&self) -> Option<Snapshot> {
        match &self.child {
            ChildRef::Spawned(actor) => Some(actor.get_snapshot()),
            ChildRef::Invoked(_) => None,
        }
    }

    /// Subscribes to the child's snapshots. `None` for adapter children.
    pub fn subscribe(&self, observer: impl Fn(&Snapshot) + Send + Sync + 'static) -> Option<Subscription> {
        match &self.child {
            ChildRef::Spawned(actor) => Some(actor.subscribe(observer)),
            ChildRef::Invoked(_) => None,
        }
    }

    /// The underlying actor for machine children.
    pub fn actor(&self) -> Option<&Actor> {
        match &self.child {
            ChildRef::Spawned(actor) => Some(actor),
            ChildRef::Invoked(_) => None,
        }
    }
}

struct Mailbox {
    queue: VecDeque<Event>,
    draining: bool,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            draining: false,
        }
    }
}

/// Mutable interpreter state, owned exclusively by the actor.
pub(crate) struct Interp {
    value: StateValue,
    context: Value,
    history: HistoryStore,
    timers: Timers,
    invocations: Invocations,
}

pub(crate) struct ActorInner {
    pub(crate) id: String,
    machine: Machine,
    state: Mutex<Interp>,
    mailbox: Mutex<Mailbox>,
    observers: Observers,
    pub(crate) children: Mutex<HashMap<String, ChildRef>>,
    status: Mutex<ActorStatus>,
    parent: Option<ParentSink>,
    id_provider: IdProvider,
}

/// Creates an actor in the stopped (created) state.
pub fn spawn_actor(machine: &Machine, options: ActorOptions) -> Actor {
    let id_provider = options
        .id_provider
        .unwrap_or_else(|| Arc::new(|| uuid::Uuid::new_v4().to_string()));
    let id = options
        .id
        .unwrap_or_else(|| format!("{}-{}", machine.definition().id, id_provider()));
    let context = machine.initial_context(options.context);

    Actor {
        inner: Arc::new(ActorInner {
            id,
            machine: machine.clone(),
            state: Mutex::new(Interp {
                value: StateValue::empty(),
                context,
                history: HistoryStore::new(),
                timers: Timers::new(),
                invocations: Invocations::default(),
            }),
            mailbox: Mutex::new(Mailbox::default()),
            observers: Observers::default(),
            children: Mutex::new(HashMap::new()),
            status: Mutex::new(ActorStatus::Created),
            parent: options.parent,
            id_provider,
        }),
    }
}

/// Handle to a running statechart interpreter.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl Actor {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> ActorStatus {
        *self.inner.status.lock()
    }

    /// Enters the initial configuration, runs its entry actions, starts
    /// timers and invocations, and chases eventless transitions. Effective
    /// once; a repeated start warns and does nothing.
    pub fn start(&self) -> Result<(), ActorError> {
        {
            let mut status = self.inner.status.lock();
            match *status {
                ActorStatus::Created => *status = ActorStatus::Running,
                _ => {
                    tracing::warn!(actor = %self.inner.id, "actor already started");
                    return Ok(());
                }
            }
        }
        tracing::info!(actor = %self.inner.id, "actor started");

        // Claim the drain so events produced by entry actions and children
        // queue up instead of re-entering the state lock.
        self.inner.mailbox.lock().draining = true;
        let result = (|| {
            {
                let mut interp = self.inner.state.lock();
                ActorInner::run_step(&self.inner, &mut interp, Event::init(), true)?;
            }
            ActorInner::notify_observers(&self.inner);
            ActorInner::drain(&self.inner)
        })();
        self.inner.mailbox.lock().draining = false;
        result
    }

    /// Enqueues and processes one event to quiescence. A no-op with a
    /// warning on an actor that is not running. An action error aborts the
    /// current macro-step before publication and is returned here.
    pub fn send(&self, event: impl Into<Event>) -> Result<(), ActorError> {
        let event = event.into();
        if *self.inner.status.lock() != ActorStatus::Running {
            tracing::warn!(
                actor = %self.inner.id,
                "send on actor that is not running, dropping '{}'",
                event.event_type
            );
            return Ok(());
        }
        ActorInner::enqueue_and_drain(&self.inner, event)
    }

    /// Cancels timers, stops invocations and spawned children, runs exit
    /// actions deepest-first with the `$stop` event, and clears observers.
    pub fn stop(&self) {
        ActorInner::run_stop(&self.inner);
    }

    /// Registers an observer notified with a snapshot after every
    /// macro-step including start.
    pub fn subscribe(&self, observer: impl Fn(&Snapshot) + Send + Sync + 'static) -> Subscription {
        let id = format!("sub-{}", (self.inner.id_provider)());
        self.inner.observers.subscribe(id, Arc::new(observer))
    }

    /// Removes an observer. Returns true if it was registered.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.observers.unsubscribe(subscription)
    }

    pub fn get_snapshot(&self) -> Snapshot {
        let interp = self.inner.state.lock();
        Snapshot::new(
            interp.value.clone(),
            interp.context.clone(),
            *self.inner.status.lock(),
            self.inner.machine.clone(),
        )
    }
}

struct Host<'a> {
    inner: &'a Arc<ActorInner>,
}

impl SpawnHost for Host<'_> {
    fn spawn_child(
        &mut self,
        logic: ActorLogic,
        options: SpawnOptions,
    ) -> Result<ChildHandle, ActorError> {
        let id = options
            .id
            .unwrap_or_else(|| format!("child-{}", (self.inner.id_provider)()));

        if self.inner.children.lock().contains_key(&id) {
            tracing::warn!(actor = %self.inner.id, "duplicate child id '{}', spawn ignored", id);
            return Err(ActorError::DuplicateChildId { id });
        }

        let child = match logic {
            ActorLogic::Machine(machine) => {
                let weak = Arc::downgrade(self.inner);
                let sink: ParentSink = Arc::new(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        ActorInner::deliver(&inner, event);
                    }
                });
                let actor = spawn_actor(
                    &machine,
                    ActorOptions {
                        id: Some(id.clone()),
                        context: options.input,
                        parent: Some(sink),
                        id_provider: Some(Arc::clone(&self.inner.id_provider)),
                    },
                );
                actor.start()?;
                ChildRef::Spawned(actor)
            }
            adapter => {
                let input = options.input.unwrap_or(Value::Null);
                let handle = start_adapter(self.inner, id.clone(), &adapter, input, true);
                ChildRef::Invoked(handle)
            }
        };

        self.inner
            .children
            .lock()
            .insert(id.clone(), child.clone());

        Ok(ChildHandle { id, child })
    }
}

impl ActorInner {
    /// Delivery entry point for timers, children and parent sinks. Events
    /// for an actor that is not running are dropped; errors from the drain
    /// are logged because there is no caller to raise them to.
    pub(crate) fn deliver(inner: &Arc<Self>, event: Event) {
        if *inner.status.lock() != ActorStatus::Running {
            tracing::debug!(
                actor = %inner.id,
                "dropping event '{}' for inactive actor",
                event.event_type
            );
            return;
        }
        if let Err(e) = Self::enqueue_and_drain(inner, event) {
            tracing::warn!(actor = %inner.id, "error processing delivered event: {}", e);
        }
    }

    fn enqueue_and_drain(inner: &Arc<Self>, event: Event) -> Result<(), ActorError> {
        {
            let mut mailbox = inner.mailbox.lock();
            mailbox.queue.push_back(event);
            if mailbox.draining {
                // The drain already running on this stack will pick it up.
                return Ok(());
            }
            mailbox.draining = true;
        }
        let result = Self::drain(inner);
        inner.mailbox.lock().draining = false;
        result
    }

    fn drain(inner: &Arc<Self>) -> Result<(), ActorError> {
        loop {
            let next = inner.mailbox.lock().queue.pop_front();
            let Some(event) = next else {
                return Ok(());
            };
            if *inner.status.lock() != ActorStatus::Running {
                inner.mailbox.lock().queue.clear();
                return Ok(());
            }
            Self::macro_step(inner, event)?;
        }
    }

    fn macro_step(inner: &Arc<Self>, event: Event) -> Result<(), ActorError> {
        let event_type = event.event_type.clone();
        let fired = {
            let mut interp = inner.state.lock();
            Self::run_step(inner, &mut interp, event, false)?
        };
        if fired {
            Self::notify_observers(inner);
        } else {
            tracing::debug!(actor = %inner.id, "event '{}' not handled, dropping", event_type);
        }
        Ok(())
    }

    /// Runs one macro-step (steps 1-12): with `start_entry`, first enters
    /// the initial configuration; then chases eventless transitions to
    /// quiescence. Returns whether anything fired.
    fn run_step(
        inner: &Arc<Self>,
        interp: &mut Interp,
        event: Event,
        start_entry: bool,
    ) -> Result<bool, ActorError> {
        let machine = inner.machine.clone();
        let def = machine.definition();
        let impls = machine.implementations();

        let mut current = event;
        let mut fired = false;

        if start_entry {
            let value = target::initial_value(def)?;
            let mut ctx = interp.context.clone();
            let mut effects: Vec<Effect> = Vec::new();

            let mut entered: Vec<StatePath> = value.active_nodes().into_iter().collect();
            entered.sort_by_key(|p| (p.len(), def.doc_order_key(p)));

            for path in &entered {
                if let Some(node) = def.node(path) {
                    Self::run_actions(inner, &node.entry, &mut ctx, &current, &mut effects)?;
                }
            }

            interp.value = value;
            interp.context = ctx;

            Self::reconcile(inner, interp, def, impls, &[], &entered, &current);
            Self::execute_effects(inner, effects);

            fired = true;
            current = Event::always();
        }

        for iteration in 0.. {
            if iteration >= MAX_EVENTLESS_ITERATIONS {
                tracing::warn!(
                    actor = %inner.id,
                    "eventless transitions exceeded {} iterations, stopping in last consistent configuration",
                    MAX_EVENTLESS_ITERATIONS
                );
                break;
            }

            let selections =
                select_transitions(def, &interp.value, &interp.context, &current, impls);
            if selections.is_empty() {
                break;
            }
            fired = true;

            // Working copies: actions observe a stable pre-step image and
            // mutate freely; publication below is atomic.
            let mut value = interp.value.clone();
            let mut ctx = interp.context.clone();
            let mut history = interp.history.clone();
            let mut effects: Vec<Effect> = Vec::new();
            let mut exited_all: Vec<StatePath> = Vec::new();
            let mut entered_all: Vec<StatePath> = Vec::new();

            for selection in &selections {
                // A region transition may have been invalidated by an
                // earlier one in the same step.
                if !value.is_active(&selection.source) {
                    continue;
                }
                let plan = plan_transition(def, &value, selection, &history)?;

                for (path, snapshot) in plan.history_saves {
                    history.save(path, snapshot);
                }
                for path in &plan.exit_set {
                    if let Some(node) = def.node(path) {
                        Self::run_actions(inner, &node.exit, &mut ctx, &current, &mut effects)?;
                    }
                }
                Self::run_actions(
                    inner,
                    &selection.transition.actions,
                    &mut ctx,
                    &current,
                    &mut effects,
                )?;
                for path in &plan.entry_set {
                    if let Some(node) = def.node(path) {
                        Self::run_actions(inner, &node.entry, &mut ctx, &current, &mut effects)?;
                    }
                }

                value = plan.next_value;
                exited_all.extend(plan.exit_set);
                entered_all.extend(plan.entry_set);
            }

            interp.value = value;
            interp.context = ctx;
            interp.history = history;

            Self::reconcile(inner, interp, def, impls, &exited_all, &entered_all, &current);
            Self::execute_effects(inner, effects);

            current = Event::always();
        }

        Ok(fired)
    }

    /// Starts timers and invocations for entered nodes and cancels/stops
    /// them for exited nodes. Exits are processed first so a re-entered node
    /// gets fresh timers and invocations.
    #[allow(clippy::too_many_arguments)]
    fn reconcile(
        inner: &Arc<Self>,
        interp: &mut Interp,
        def: &MachineDefinition,
        impls: &Implementations,
        exited: &[StatePath],
        entered: &[StatePath],
        event: &Event,
    ) {
        let Interp {
            context,
            timers,
            invocations,
            ..
        } = interp;

        for path in exited {
            timers.cancel_path(path);
            for id in invocations.stop_for_path(path) {
                inner.children.lock().remove(&id);
            }
        }

        for path in entered {
            let Some(node) = def.node(path) else {
                continue;
            };
            if !node.after.is_empty() {
                timers.start_node(inner, node, impls, context, event);
            }
            if !node.invoke.is_empty() {
                invocations.start_for_node(inner, node, impls, context, event);
            }
        }
    }

    fn execute_effects(inner: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendTo { id, event } => {
                    let child = inner.children.lock().get(&id).cloned();
                    match child {
                        Some(ChildRef::Spawned(actor)) => {
                            if let Err(e) = actor.send(event) {
                                tracing::warn!(actor = %inner.id, "error sending to child '{}': {}", id, e);
                            }
                        }
                        Some(ChildRef::Invoked(handle)) => handle.deliver(&event),
                        None => {
                            tracing::warn!(actor = %inner.id, "unknown child actor '{}', dropping '{}'", id, event.event_type);
                        }
                    }
                }
                Effect::SendParent { event } => match &inner.parent {
                    Some(sink) => sink(event),
                    None => {
                        tracing::warn!(actor = %inner.id, "no parent actor, dropping '{}'", event.event_type);
                    }
                },
            }
        }
    }

    fn run_actions(
        inner: &Arc<Self>,
        names: &[String],
        ctx: &mut Value,
        event: &Event,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ActorError> {
        for name in names {
            let Some(action) = inner.machine.implementations().get_action(name).cloned() else {
                tracing::warn!(actor = %inner.id, "no implementation for action '{}', skipping", name);
                continue;
            };
            let mut host = Host { inner };
            let mut args = ActionArgs::new(ctx, event, effects, &mut host);
            action(&mut args).map_err(|e| ActorError::Action {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn notify_observers(inner: &Arc<Self>) {
        let snapshot = {
            let interp = inner.state.lock();
            Snapshot::new(
                interp.value.clone(),
                interp.context.clone(),
                *inner.status.lock(),
                inner.machine.clone(),
            )
        };
        inner.observers.notify(&snapshot);
    }

    fn run_stop(inner: &Arc<Self>) {
        {
            let mut status = inner.status.lock();
            if *status == ActorStatus::Stopped {
                return;
            }
            let was_running = *status == ActorStatus::Running;
            *status = ActorStatus::Stopped;
            if !was_running {
                return;
            }
        }

        let mut effects: Vec<Effect> = Vec::new();
        {
            let mut interp = inner.state.lock();
            interp.timers.cancel_all();
            interp.invocations.stop_all();

            let children: Vec<ChildRef> = inner
                .children
                .lock()
                .drain()
                .map(|(_, child)| child)
                .collect();
            for child in children {
                match child {
                    ChildRef::Spawned(actor) => actor.stop(),
                    ChildRef::Invoked(handle) => handle.stop(),
                }
            }

            let machine = inner.machine.clone();
            let def = machine.definition();
            let event = Event::stop();
            let mut ctx = interp.context.clone();

            let mut active: Vec<StatePath> = interp.value.active_nodes().into_iter().collect();
            active.sort_by_key(|p| (Reverse(p.len()), def.doc_order_key(p)));

            for path in &active {
                if let Some(node) = def.node(path) {
                    if let Err(e) =
                        Self::run_actions(inner, &node.exit, &mut ctx, &event, &mut effects)
                    {
                        tracing::warn!(actor = %inner.id, "exit action failed during stop: {}", e);
                    }
                }
            }
            interp.context = ctx;
        }

        Self::execute_effects(inner, effects);
        inner.observers.clear();
        tracing::info!(actor = %inner.id, "actor stopped");
    }
}
