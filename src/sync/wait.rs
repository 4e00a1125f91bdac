//! Named, cancellable delays.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

/// How a [`WaitMap::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay elapsed.
    Completed,
    /// The wait was cancelled by key before the delay elapsed.
    Cancelled,
}

impl WaitOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Keyed cancellable delays, used for retry backoff.
///
/// One wait may be outstanding per key at a time; callers are expected to
/// serialize their own retry loops.
#[derive(Default)]
pub struct WaitMap {
    waits: Mutex<HashMap<String, Arc<Notify>>>,
}

impl WaitMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `duration`, unless cancelled by key first.
    pub async fn wait(&self, key: &str, duration: Duration) -> WaitOutcome {
        let cancel = Arc::new(Notify::new());
        self.slot().insert(key.to_owned(), Arc::clone(&cancel));

        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => WaitOutcome::Completed,
            _ = cancel.notified() => WaitOutcome::Cancelled,
        };

        let mut waits = self.slot();
        if waits
            .get(key)
            .is_some_and(|pending| Arc::ptr_eq(pending, &cancel))
        {
            waits.remove(key);
        }
        outcome
    }

    /// Cancel the wait under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.slot().remove(key) {
            Some(pending) => {
                pending.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending wait.
    pub fn cancel_all(&self) {
        for (_, pending) in self.slot().drain() {
            pending.notify_one();
        }
    }

    fn slot(&self) -> MutexGuard<'_, HashMap<String, Arc<Notify>>> {
        self.waits.lock().unwrap_or_else(|err| err.into_inner())
    }
}
