//! Delayed transition scheduling.
//!
//! A timer exists per `(path, delay key)` while the path is active. The
//! delay is resolved once at scheduling time: a numeric key is taken as
//! milliseconds, a named key consults the implementations table (a missing
//! name warns and schedules zero). Cancellation aborts the backing task
//! before the path is considered exited, and a fired-but-stale delay event
//! finds no active node, so it has no effect.
//!
//! A zero delay still goes through the task queue: the event is delivered in
//! a later macro-step, after the scheduling state's entry actions have run.

use crate::actor::ActorInner;
use crate::machine::{DelayImpl, Implementations};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stator_core::{Event, StateNode, StatePath};
use tokio::task::JoinHandle;

fn resolve_delay(impls: &Implementations, key: &str, ctx: &Value, event: &Event) -> u64 {
    if let Ok(ms) = key.parse::<u64>() {
        return ms;
    }
    match impls.get_delay(key) {
        Some(DelayImpl::Fixed(ms)) => *ms,
        Some(DelayImpl::Dynamic(f)) => f(ctx, event),
        None => {
            tracing::warn!("no implementation for delay '{}', scheduling zero", key);
            0
        }
    }
}

/// Active timers keyed by `(path, delay key)`.
#[derive(Default)]
pub(crate) struct Timers {
    handles: HashMap<(StatePath, String), JoinHandle<()>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules every `after` entry of a newly entered node.
    pub fn start_node(
        &mut self,
        inner: &Arc<ActorInner>,
        node: &StateNode,
        impls: &Implementations,
        ctx: &Value,
        event: &Event,
    ) {
        for (key, _) in &node.after {
            let ms = resolve_delay(impls, key, ctx, event);
            let delay_event = Event::delay(&node.path, key);
            let weak = Arc::downgrade(inner);

            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if let Some(inner) = weak.upgrade() {
                    ActorInner::deliver(&inner, delay_event);
                }
            });

            if let Some(old) = self.handles.insert((node.path.clone(), key.clone()), handle) {
                old.abort();
            }
        }
    }

    /// Cancels every timer scheduled for a path.
    pub fn cancel_path(&mut self, path: &StatePath) {
        let keys: Vec<(StatePath, String)> = self
            .handles
            .keys()
            .filter(|(p, _)| p == path)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = self.handles.remove(&key) {
                handle.abort();
            }
        }
    }

    /// Cancels everything (actor stop).
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}
