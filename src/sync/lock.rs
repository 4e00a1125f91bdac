//! Serializing lock: exclusive FIFO phases with shared pass-through.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// Serializes async operations against a shared resource.
///
/// `lock` runs its closure exclusively, queued FIFO behind other `lock`
/// callers. `run` waits only for an active exclusive phase and then proceeds
/// concurrently with other `run` callers. A failing closure releases the
/// lock for the next waiter; its error propagates to the caller.
#[derive(Clone, Default)]
pub struct SerialLock {
    inner: Arc<RwLock<()>>,
}

/// Exclusive guard handed out by [`SerialLock::try_lock`].
pub struct SerialGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl SerialLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` exclusively, FIFO with respect to other `lock` calls.
    pub async fn lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.write().await;
        f().await
    }

    /// Run `f` once no exclusive phase is active. Independent `run` calls
    /// are not ordered against each other.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.read().await;
        f().await
    }

    /// Acquire the exclusive guard without waiting, or `None` if the lock is
    /// busy. Used as a reentrancy guard.
    pub fn try_lock(&self) -> Option<SerialGuard> {
        Arc::clone(&self.inner)
            .try_write_owned()
            .ok()
            .map(|guard| SerialGuard { _guard: guard })
    }
}
