use crate::MemoryQueue;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// Named in-memory queues for single-process deployments.
///
/// Opening the same name twice yields handles on the same FIFO, which is how
/// pipeline stages running in one process hand work to each other.
pub struct MemoryQueues<T> {
    queues: Arc<DashMap<String, MemoryQueue<T>>>,
    capacity: Option<usize>,
}

impl<T> MemoryQueues<T> {
    /// Registry whose queues are unbounded.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            capacity: None,
        }
    }

    /// Registry whose queues each hold at most `capacity` entries.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Returns the queue registered under `name`, creating it if needed.
    pub fn open(&self, name: &str) -> MemoryQueue<T> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = name, "creating in-memory queue");
                match self.capacity {
                    Some(capacity) => MemoryQueue::bounded(capacity),
                    None => MemoryQueue::unbounded(),
                }
            })
            .clone()
    }

    /// Forgets the queue registered under `name`. Existing handles keep working.
    pub fn remove(&self, name: &str) -> Option<MemoryQueue<T>> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    /// Names of every registered queue.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }
}

impl<T> Clone for MemoryQueues<T> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Default for MemoryQueues<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> Debug for MemoryQueues<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueues")
            .field("names", &self.names())
            .field("capacity", &self.capacity)
            .finish()
    }
}
