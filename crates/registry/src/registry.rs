//! Registry of running health-check tasks.

use crate::task::{HealthCheckTask, TaskContext, TaskHandle};
use crate::types::Registration;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Owns the table mapping service id to its health-check task
///
/// Every read-modify-write of the table happens under one lock
/// acquisition, and a task is stopped in the same critical section that
/// removes it, so the table and the set of live tasks never diverge.
pub struct Registry {
    tasks: Mutex<HashMap<String, TaskHandle>>,
    context: TaskContext,
}

impl Registry {
    pub fn new(context: TaskContext) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            context,
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Start health checking `registration`
    ///
    /// The task is in the table when this returns; its first probe runs
    /// asynchronously. A task already running for the same service id is
    /// stopped and replaced.
    pub async fn register(&self, registration: Registration) {
        let service_id = registration.service_id.clone();
        let task = HealthCheckTask::new(registration, self.context.clone());

        let replaced = {
            let mut tasks = self.tasks.lock().await;
            let replaced = tasks.insert(service_id.clone(), task.spawn());
            if let Some(ref old) = replaced {
                old.stop();
            }
            replaced
        };

        if let Some(ref m) = self.context.metrics {
            m.record_operation("register");
        }

        match replaced {
            Some(old) => {
                warn!(service_id = %service_id, "Replaced running health check task");
                old.join().await;
            }
            None => info!(service_id = %service_id, "Registered service for health checking"),
        }
    }

    /// Stop and remove the task for `service_id`
    ///
    /// Returns whether a task was removed. Deregistering an unknown id is
    /// a no-op. When a task was removed this waits for it to exit, so no
    /// further status writes happen after it returns.
    pub async fn deregister(&self, service_id: &str) -> bool {
        let removed = {
            let mut tasks = self.tasks.lock().await;
            let removed = tasks.remove(service_id);
            if let Some(ref handle) = removed {
                handle.stop();
            }
            removed
        };

        match removed {
            Some(handle) => {
                handle.join().await;
                if let Some(ref m) = self.context.metrics {
                    m.record_operation("deregister");
                }
                info!(service_id = %service_id, "Deregistered service");
                true
            }
            None => {
                debug!(service_id = %service_id, "Service not registered, nothing to deregister");
                false
            }
        }
    }

    /// Stop every task and wait for all of them to exit
    pub async fn shutdown(&self) {
        self.context.shutdown.cancel();

        let handles: Vec<TaskHandle> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, handle)| handle).collect()
        };

        info!(count = handles.len(), "Stopping health check tasks");
        for handle in handles {
            handle.stop();
            handle.join().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub async fn contains(&self, service_id: &str) -> bool {
        self.tasks.lock().await.contains_key(service_id)
    }

    /// Service ids currently in the table, sorted
    pub async fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of spawned tasks that have not exited yet
    pub fn live_tasks(&self) -> usize {
        self.context.live_tasks()
    }
}
