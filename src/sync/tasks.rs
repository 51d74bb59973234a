//! Bounded registry for fire-and-forget background work.
//!
//! Tasks are keyed so the same refresh is never queued twice, capped so a
//! burst of stale reads cannot spawn unbounded work, and can be drained
//! with [`TaskRegistry::flush_pending`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const DEFAULT_MAX_PENDING: usize = 16;

#[derive(Debug)]
pub struct TaskRegistry {
    capacity: usize,
    tasks: Mutex<JoinSet<()>>,
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Removes the task key when the task finishes, panics, or is aborted.
struct KeyGuard {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        lock(&self.keys).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tasks: Mutex::new(JoinSet::new()),
            keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawn `task` under `key` on the current tokio runtime.
    ///
    /// Returns `false` (and drops the task) if the same key is already in
    /// flight or the registry is full.
    pub fn spawn<F>(&self, key: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        {
            let mut keys = lock(&self.keys);
            if keys.contains(&key) {
                debug!(key = %key, "Background task already pending");
                return false;
            }
            if keys.len() >= self.capacity {
                warn!(
                    key = %key,
                    capacity = self.capacity,
                    "Task registry full, dropping background task"
                );
                return false;
            }
            keys.insert(key.clone());
        }

        let guard = KeyGuard {
            key,
            keys: Arc::clone(&self.keys),
        };
        let mut tasks = lock(&self.tasks);
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _guard = guard;
            task.await;
        });
        true
    }

    /// Number of tasks still in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.keys).len()
    }

    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.keys).contains(key)
    }

    /// Wait for every task in flight, including ones spawned while waiting.
    ///
    /// A task that panicked is logged and otherwise ignored.
    pub async fn flush_pending(&self) {
        loop {
            let mut drained = std::mem::take(&mut *lock(&self.tasks));
            if drained.is_empty() {
                return;
            }
            while let Some(joined) = drained.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Background task did not complete");
                }
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}
