//! # stator
//!
//! A hierarchical statechart interpreter: declarative machine definitions,
//! guarded and delayed transitions, parallel regions, history states, and a
//! per-machine actor runtime with invoked child actors.
//!
//! ```
//! use serde_json::json;
//! use stator::{spawn_actor, ActorOptions, Machine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let machine = Machine::build(&json!({
//!     "id": "light",
//!     "initial": "green",
//!     "states": {
//!         "green":  {"on": {"NEXT": "yellow"}},
//!         "yellow": {"on": {"NEXT": "red"}},
//!         "red":    {"on": {"NEXT": "green"}}
//!     }
//! }))
//! .unwrap();
//!
//! let actor = spawn_actor(&machine, ActorOptions::default());
//! actor.start().unwrap();
//! actor.send("NEXT").unwrap();
//! assert!(actor.get_snapshot().matches("yellow"));
//! # }
//! ```

pub use stator_actor::{
    from_callback, from_promise, spawn_actor, ActionArgs, ActionError, Actor, ActorError,
    ActorLogic, ActorOptions, ActorStatus, CallbackArgs, ChildHandle, Effect, IdProvider,
    Implementations, Machine, ParentSink, Snapshot, SpawnOptions, Subscription,
};
pub use stator_core::{
    CoreError, Event, HistoryStore, MachineConfig, MachineDefinition, StatePath, StateValue,
};
