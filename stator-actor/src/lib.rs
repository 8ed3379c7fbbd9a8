//! # stator-actor
//!
//! Actor runtime for stator.
//!
//! This crate provides:
//! - The public machine surface: [`Machine::build`], [`Machine::provide`],
//!   and the [`Implementations`] table of named actions, guards, delays,
//!   logics and inputs
//! - The actor event loop: [`spawn_actor`], [`Actor::start`], [`Actor::send`],
//!   [`Actor::stop`], subscriptions and snapshots
//! - Delayed transitions, invocations bound to state activation, and the
//!   promise/callback/machine child adapters ([`from_promise`],
//!   [`from_callback`])
//!
//! Actors require a tokio runtime for timers and invoked children.

pub mod actor;
pub mod effect;
pub mod error;
mod invoke;
pub mod logic;
pub mod machine;
mod observer;
pub mod snapshot;
mod timer;

pub use actor::{
    spawn_actor, Actor, ActorOptions, ChildHandle, IdProvider, ParentSink, SpawnOptions,
};
pub use effect::Effect;
pub use error::{ActionError, ActorError};
pub use logic::{from_callback, from_promise, ActorLogic, CallbackArgs, CleanupFn};
pub use machine::{ActionArgs, DelayImpl, Implementations, Machine};
pub use observer::Subscription;
pub use snapshot::{ActorStatus, Snapshot};
