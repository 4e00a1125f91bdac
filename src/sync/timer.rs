//! Single-slot delayed callback scheduler.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

/// Schedules at most one delayed callback at a time.
///
/// Arming a new callback replaces any pending one; the replaced callback
/// never fires. A callback that has already started running is not affected
/// by `clear` or re-`schedule` — only the pending delay is cancelled.
#[derive(Default)]
pub struct Timer {
    pending: Mutex<Option<Arc<Notify>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `f` to run after `delay`, replacing any pending callback.
    pub fn schedule<F, Fut>(&self, delay: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        if let Some(previous) = self.slot().replace(Arc::clone(&cancel)) {
            previous.notify_one();
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.notified() => return,
            }
            f().await;
        });
    }

    /// Cancel the pending callback, if any. Safe to call when none is armed.
    pub fn clear(&self) {
        if let Some(pending) = self.slot().take() {
            pending.notify_one();
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Notify>>> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }
}
