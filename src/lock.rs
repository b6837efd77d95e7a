//! Process-wide serialization of configuration writers.
//!
//! A device tolerates a single configuration-lock holder, while the plugin
//! host runs resource operations concurrently. Every write sequence (and any
//! read that must see a consistent device state right before a write) runs
//! while holding a [`LockGuard`] from the same [`LockManager`].
//!
//! The lock is not reentrant: acquiring it twice from one operation
//! deadlocks.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use log::debug;
use once_cell::sync::Lazy;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default process-wide lock shared by managers that are not given one.
pub static GLOBAL_LOCK: Lazy<Arc<LockManager>> = Lazy::new(|| Arc::new(LockManager::new()));

/// Binary lock with holder bookkeeping for diagnostics.
#[derive(Debug, Default)]
pub struct LockManager {
    inner: Arc<Mutex<()>>,
    holder: Arc<StdMutex<Option<String>>>,
}

/// Held configuration-writer lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
    holder: Arc<StdMutex<Option<String>>>,
    label: String,
    acquired_at: Instant,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock. `label` names the operation in logs.
    pub async fn lock(&self, label: &str) -> LockGuard {
        let started = Instant::now();
        if let Some(current) = self.holder() {
            debug!("{label} waiting for configuration lock held by {current}");
        }
        let guard = self.inner.clone().lock_owned().await;
        debug!(
            "{label} acquired configuration lock after {:?}",
            started.elapsed()
        );
        self.guard(guard, label)
    }

    /// Takes the lock only if it is free.
    pub fn try_lock(&self, label: &str) -> Option<LockGuard> {
        let guard = self.inner.clone().try_lock_owned().ok()?;
        Some(self.guard(guard, label))
    }

    /// Label of the operation currently holding the lock.
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    fn guard(&self, guard: OwnedMutexGuard<()>, label: &str) -> LockGuard {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = Some(label.to_string());
        }
        LockGuard {
            _guard: guard,
            holder: self.holder.clone(),
            label: label.to_string(),
            acquired_at: Instant::now(),
        }
    }
}

impl LockGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
        debug!(
            "{} released configuration lock after {:?}",
            self.label,
            self.acquired_at.elapsed()
        );
    }
}
