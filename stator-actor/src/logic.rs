//! Child-actor logic.
//!
//! Three logic kinds can back an invocation or a spawned child:
//!
//! - **Promise logic** ([`from_promise`]): a future producing an output.
//!   Completion emits `done.invoke.<id>`, failure emits `error.invoke.<id>`.
//! - **Callback logic** ([`from_callback`]): a callable receiving
//!   [`CallbackArgs`] (`send_back`, `receive`, `input`) and optionally
//!   returning a cleanup callable invoked on stop.
//! - **Machine logic**: a nested actor whose parent-event sink targets the
//!   outer actor's mailbox.

use crate::machine::Machine;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use stator_core::Event;

/// Future produced by promise logic: output on success, error value on
/// failure.
pub type PromiseFuture = Pin<Box<dyn Future<Output = Result<Value, Value>> + Send>>;

/// Factory invoked with the resolved input each time the logic starts.
pub type PromiseFn = Arc<dyn Fn(Value) -> PromiseFuture + Send + Sync>;

/// Cleanup callable returned by callback logic, invoked once on stop.
pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// Callback logic body.
pub type CallbackFn = Arc<dyn Fn(CallbackArgs) -> Option<CleanupFn> + Send + Sync>;

/// Listener registered through [`CallbackArgs::receive`].
pub type ReceiveFn = Arc<dyn Fn(&Event) + Send + Sync>;

/// Logic backing an invocation or spawned child.
#[derive(Clone)]
pub enum ActorLogic {
    Promise(PromiseFn),
    Callback(CallbackFn),
    Machine(Machine),
}

impl std::fmt::Debug for ActorLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorLogic::Promise(_) => f.write_str("ActorLogic::Promise"),
            ActorLogic::Callback(_) => f.write_str("ActorLogic::Callback"),
            ActorLogic::Machine(m) => write!(f, "ActorLogic::Machine({})", m.definition().id),
        }
    }
}

impl From<Machine> for ActorLogic {
    fn from(machine: Machine) -> Self {
        ActorLogic::Machine(machine)
    }
}

/// Wraps a callable returning a future into promise logic.
pub fn from_promise<F, Fut>(f: F) -> ActorLogic
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    ActorLogic::Promise(Arc::new(move |input| Box::pin(f(input))))
}

/// Wraps a callback-style callable into callback logic.
pub fn from_callback<F>(f: F) -> ActorLogic
where
    F: Fn(CallbackArgs) -> Option<CleanupFn> + Send + Sync + 'static,
{
    ActorLogic::Callback(Arc::new(f))
}

/// Arguments handed to callback logic on start.
///
/// Cloneable so `send_back` can be used from inside `receive` listeners or
/// moved into spawned work.
#[derive(Clone)]
pub struct CallbackArgs {
    /// Resolved input value.
    pub input: Value,

    send_back: Arc<dyn Fn(Event) + Send + Sync>,
    listeners: Arc<Mutex<Vec<ReceiveFn>>>,
}

impl CallbackArgs {
    pub(crate) fn new(
        input: Value,
        send_back: Arc<dyn Fn(Event) + Send + Sync>,
        listeners: Arc<Mutex<Vec<ReceiveFn>>>,
    ) -> Self {
        Self {
            input,
            send_back,
            listeners,
        }
    }

    /// Forwards an event to the invoking actor. Inhibited after stop.
    pub fn send_back(&self, event: impl Into<Event>) {
        (self.send_back)(event.into());
    }

    /// Registers a listener for events the invoking actor sends into this
    /// child.
    pub fn receive(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }
}
