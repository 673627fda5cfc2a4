use crate::worker_session::WorkerHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registered workers keyed by the function names they declared
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Vec<Arc<WorkerHandle>>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker for a function. Registering twice is a no-op.
    pub fn register(&self, function: &str, worker: Arc<WorkerHandle>) {
        let mut workers = self.workers.write();
        let list = workers.entry(function.to_string()).or_default();
        if !list.iter().any(|w| Arc::ptr_eq(w, &worker)) {
            list.push(worker);
        }
    }

    /// Remove a worker from every function it registered for.
    pub fn deregister(&self, worker: &Arc<WorkerHandle>) -> usize {
        let mut workers = self.workers.write();
        let mut removed = 0;

        workers.retain(|_, list| {
            let before = list.len();
            list.retain(|w| !Arc::ptr_eq(w, worker));
            removed += before - list.len();
            !list.is_empty()
        });

        removed
    }

    /// Wake at most one sleeping worker registered for `function`.
    ///
    /// Workers are tried in registration order. Returns whether one was woken.
    pub fn notify_one(&self, function: &str) -> bool {
        let workers = self.workers.read();
        let Some(list) = workers.get(function) else {
            return false;
        };

        for worker in list {
            match worker.wake() {
                Ok(true) => {
                    debug!("Woke worker {} for {}", worker.id(), function);
                    return true;
                }
                Ok(false) => {}
                Err(e) => warn!("Error waking {} worker {}: {}", function, worker.id(), e),
            }
        }

        false
    }

    /// Workers registered for one function
    pub fn count_for(&self, function: &str) -> usize {
        let workers = self.workers.read();
        workers.get(function).map_or(0, Vec::len)
    }

    /// Workers registered for one function that are currently asleep
    pub fn count_sleeping(&self, function: &str) -> usize {
        let workers = self.workers.read();
        workers
            .get(function)
            .map_or(0, |list| list.iter().filter(|w| w.is_asleep()).count())
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
