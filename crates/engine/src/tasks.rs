//! Background task tracking for promotion work.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Registry of in-flight promotion tasks, keyed by upload id.
///
/// Submission is synchronous and execution is concurrent, one task per
/// upload, never serialized through a shared worker. Tasks deregister
/// themselves when they finish, so the map only holds live work; [`wait`]
/// lets tests and shutdown paths await one upload's promotion without
/// ordering uploads against each other.
///
/// [`wait`]: TaskRegistry::wait
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Track a spawned promotion task.
    pub async fn register(&self, upload_id: &str, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        // A task that finished before registration already deregistered
        // itself into nothing; sweep any such leftovers while we hold the
        // lock so the map never accumulates dead handles.
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(upload_id.to_string(), handle);
    }

    /// Drop a finished task's entry. Called by the task itself.
    pub async fn deregister(&self, upload_id: &str) {
        self.tasks.lock().await.remove(upload_id);
    }

    /// Await one upload's promotion if it is still in flight.
    pub async fn wait(&self, upload_id: &str) {
        let handle = self.tasks.lock().await.remove(upload_id);
        if let Some(handle) = handle
            && let Err(err) = handle.await
            && err.is_panic()
        {
            tracing::error!(upload_id = %upload_id, panic = ?err, "promotion task panicked");
        }
    }

    /// Await every in-flight promotion. Used on shutdown.
    pub async fn drain(&self) {
        let handles: Vec<(String, JoinHandle<()>)> =
            self.tasks.lock().await.drain().collect();
        for (upload_id, handle) in handles {
            if let Err(err) = handle.await
                && err.is_panic()
            {
                tracing::error!(upload_id = %upload_id, panic = ?err, "promotion task panicked");
            }
        }
    }

    /// Number of tracked tasks, finished or not.
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
