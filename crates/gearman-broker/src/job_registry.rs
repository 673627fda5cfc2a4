use crate::connection::Connection;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Which pending job a worker receives first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOrder {
    /// Oldest submission first
    #[default]
    Fifo,
    /// Newest submission first
    Lifo,
}

/// One submitted unit of work
#[derive(Debug, Clone)]
pub struct Job {
    pub handle: String,
    pub function: String,
    /// Client-supplied job id from the submission
    pub unique_id: Bytes,
    pub payload: Bytes,
    /// Connection status packets are relayed to; `None` for background jobs
    pub client: Option<Connection>,
}

struct PendingJobs {
    by_function: HashMap<String, VecDeque<Job>>,
    next_handle: u64,
}

/// Pending jobs keyed by function name
pub struct JobRegistry {
    pending: RwLock<PendingJobs>,
    hostname: String,
    order: DispatchOrder,
}

impl JobRegistry {
    pub fn new(hostname: impl Into<String>, order: DispatchOrder) -> Self {
        JobRegistry {
            pending: RwLock::new(PendingJobs {
                by_function: HashMap::new(),
                next_handle: 0,
            }),
            hostname: hostname.into(),
            order,
        }
    }

    /// Queue a job and return its newly issued handle.
    pub fn enqueue(
        &self,
        function: &str,
        unique_id: Bytes,
        payload: Bytes,
        client: Option<Connection>,
    ) -> String {
        let mut pending = self.pending.write();

        let handle = format!("H:{}:{}", self.hostname, pending.next_handle);
        pending.next_handle += 1;

        let job = Job {
            handle: handle.clone(),
            function: function.to_string(),
            unique_id,
            payload,
            client,
        };
        pending
            .by_function
            .entry(function.to_string())
            .or_default()
            .push_back(job);

        handle
    }

    /// Remove one pending job for `function`, honoring the dispatch order.
    pub fn take_one(&self, function: &str) -> Option<Job> {
        let mut pending = self.pending.write();
        let jobs = pending.by_function.get_mut(function)?;

        let job = match self.order {
            DispatchOrder::Fifo => jobs.pop_front(),
            DispatchOrder::Lifo => jobs.pop_back(),
        };
        if jobs.is_empty() {
            pending.by_function.remove(function);
        }

        job
    }

    /// Pending jobs for one function
    pub fn pending_for(&self, function: &str) -> usize {
        let pending = self.pending.read();
        pending.by_function.get(function).map_or(0, VecDeque::len)
    }

    /// Total pending jobs
    pub fn len(&self) -> usize {
        let pending = self.pending.read();
        pending.by_function.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
