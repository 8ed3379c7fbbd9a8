//! Invocation lifecycle.
//!
//! Invocations declared on a state node start when the node is entered and
//! stop when it is exited or the actor stops. An external self-transition
//! exits and re-enters the node, so its invocations restart.
//!
//! Zombie prevention is two-layered: a stopped adapter never emits again,
//! and completion events that race a stop arrive as `done.invoke.<id>` /
//! `error.invoke.<id>` events whose declaring state is no longer active, so
//! selection drops them.

use crate::actor::{ActorInner, ActorOptions, ChildRef, ParentSink};
use crate::logic::{ActorLogic, CallbackArgs, CleanupFn, ReceiveFn};
use crate::machine::Implementations;
use crate::spawn_actor;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stator_core::{Event, StateNode, StatePath};
use tokio::task::JoinHandle;

/// A started adapter: promise task, callback cleanup/listeners, or a nested
/// machine actor.
pub(crate) struct RunningInvocation {
    pub id: String,
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    cleanup: Mutex<Option<CleanupFn>>,
    listeners: Arc<Mutex<Vec<ReceiveFn>>>,
    child: Mutex<Option<crate::actor::Actor>>,
}

impl RunningInvocation {
    /// Stops the adapter: no further emission, promise task aborted,
    /// callback cleanup invoked, nested actor stopped. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
        if let Some(child) = self.child.lock().take() {
            child.stop();
        }
        self.listeners.lock().clear();
    }

    /// Delivers an event sent into this child by the owning actor.
    pub fn deliver(&self, event: &Event) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Some(child) = self.child.lock().as_ref() {
            if let Err(e) = child.send(event.clone()) {
                tracing::warn!("error delivering '{}' to child '{}': {}", event.event_type, self.id, e);
            }
            return;
        }
        let listeners: Vec<ReceiveFn> = self.listeners.lock().clone();
        if listeners.is_empty() {
            tracing::warn!("child '{}' does not receive events, dropping '{}'", self.id, event.event_type);
        }
        for listener in listeners {
            listener(event);
        }
    }
}

/// Constructs and starts the adapter for a logic, wiring its outbound events
/// to the owning actor's mailbox.
pub(crate) fn start_adapter(
    inner: &Arc<ActorInner>,
    id: String,
    logic: &ActorLogic,
    input: Value,
    has_error_handler: bool,
) -> Arc<RunningInvocation> {
    let stopped = Arc::new(AtomicBool::new(false));
    let listeners: Arc<Mutex<Vec<ReceiveFn>>> = Arc::new(Mutex::new(Vec::new()));
    let invocation = Arc::new(RunningInvocation {
        id: id.clone(),
        stopped: Arc::clone(&stopped),
        task: Mutex::new(None),
        cleanup: Mutex::new(None),
        listeners: Arc::clone(&listeners),
        child: Mutex::new(None),
    });

    match logic {
        ActorLogic::Promise(factory) => {
            let future = factory(input);
            let weak = Arc::downgrade(inner);
            let task_stopped = Arc::clone(&stopped);
            let task_id = id;

            let task = tokio::spawn(async move {
                let result = future.await;
                if task_stopped.load(Ordering::SeqCst) {
                    return;
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(output) => {
                        ActorInner::deliver(&inner, Event::done_invoke(&task_id, output));
                    }
                    Err(error) => {
                        if has_error_handler {
                            ActorInner::deliver(&inner, Event::error_invoke(&task_id, error));
                        } else {
                            tracing::error!("unhandled error from invocation '{}': {}", task_id, error);
                        }
                    }
                }
            });
            *invocation.task.lock() = Some(task);
        }

        ActorLogic::Callback(callback) => {
            let weak = Arc::downgrade(inner);
            let back_stopped = Arc::clone(&stopped);
            let send_back: Arc<dyn Fn(Event) + Send + Sync> = Arc::new(move |event| {
                if back_stopped.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    ActorInner::deliver(&inner, event);
                }
            });

            let args = CallbackArgs::new(input, send_back, Arc::clone(&listeners));
            *invocation.cleanup.lock() = callback(args);
        }

        ActorLogic::Machine(machine) => {
            let weak = Arc::downgrade(inner);
            let sink_stopped = Arc::clone(&stopped);
            let sink: ParentSink = Arc::new(move |event| {
                if sink_stopped.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    ActorInner::deliver(&inner, event);
                }
            });

            let context = if input.is_null() { None } else { Some(input) };
            let child = spawn_actor(
                machine,
                ActorOptions {
                    id: Some(id.clone()),
                    context,
                    parent: Some(sink),
                    id_provider: None,
                },
            );
            if let Err(e) = child.start() {
                tracing::warn!("failed to start invoked machine '{}': {}", id, e);
            }
            *invocation.child.lock() = Some(child);
        }
    }

    invocation
}

/// State-bound invocations, keyed by declaring node path.
#[derive(Default)]
pub(crate) struct Invocations {
    by_path: HashMap<StatePath, Vec<Arc<RunningInvocation>>>,
}

impl Invocations {
    /// Starts every invocation of a newly entered node and registers the
    /// handles as children of the owning actor.
    pub fn start_for_node(
        &mut self,
        inner: &Arc<ActorInner>,
        node: &StateNode,
        impls: &Implementations,
        ctx: &Value,
        event: &Event,
    ) {
        for inv in &node.invoke {
            let input = match &inv.input {
                Value::String(name) => match impls.get_input(name) {
                    Some(f) => f(ctx, event),
                    None => inv.input.clone(),
                },
                other => other.clone(),
            };

            let Some(logic) = impls.get_logic(&inv.src) else {
                tracing::warn!("no logic '{}' for invocation '{}', skipping", inv.src, inv.id);
                continue;
            };

            let handle = start_adapter(inner, inv.id.clone(), logic, input, inv.has_error_handler);

            let mut children = inner.children.lock();
            if children
                .insert(inv.id.clone(), ChildRef::Invoked(Arc::clone(&handle)))
                .is_some()
            {
                tracing::warn!("child id '{}' reused by invocation", inv.id);
            }
            drop(children);

            self.by_path
                .entry(node.path.clone())
                .or_default()
                .push(handle);
        }
    }

    /// Stops every invocation bound to a path; returns the stopped ids so
    /// the caller can drop the child registrations.
    pub fn stop_for_path(&mut self, path: &StatePath) -> Vec<String> {
        let Some(handles) = self.by_path.remove(path) else {
            return Vec::new();
        };
        let mut ids = Vec::with_capacity(handles.len());
        for handle in handles {
            handle.stop();
            ids.push(handle.id.clone());
        }
        ids
    }

    /// Stops everything (actor stop); returns the stopped ids.
    pub fn stop_all(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        for (_, handles) in self.by_path.drain() {
            for handle in handles {
                handle.stop();
                ids.push(handle.id.clone());
            }
        }
        ids
    }

    pub fn active_count(&self) -> usize {
        self.by_path.values().map(|v| v.len()).sum()
    }
}
