//! Observer management.
//!
//! Observers are notified synchronously after each macro-step. A panicking
//! observer is logged and skipped; remaining observers are still notified.

use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// An observer callback.
pub type ObserverFn = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Handle for removing an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: String,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    entries: Mutex<HashMap<String, ObserverFn>>,
}

impl Observers {
    pub fn subscribe(&self, id: String, observer: ObserverFn) -> Subscription {
        self.entries.lock().insert(id.clone(), observer);
        Subscription { id }
    }

    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.entries.lock().remove(&subscription.id).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Notifies every observer, isolating panics.
    ///
    /// Callbacks run outside the registry lock so an observer may subscribe
    /// or unsubscribe from within its own notification.
    pub fn notify(&self, snapshot: &Snapshot) {
        let observers: Vec<ObserverFn> = self.entries.lock().values().cloned().collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(snapshot))).is_err() {
                tracing::warn!("observer panicked, continuing with remaining observers");
            }
        }
    }
}
