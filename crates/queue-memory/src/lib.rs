//! In-memory implementation of the queue contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod registry;

pub use registry::MemoryQueues;

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dossier_queue::BlockingQueue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    available: Notify,
}

/// Single-process FIFO, optionally bounded. Clones share the same entries.
pub struct MemoryQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> MemoryQueue<T> {
    /// Creates a queue holding at most `capacity` entries.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// Creates a queue without a size limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                capacity,
                closed: AtomicBool::new(false),
                available: Notify::new(),
            }),
        }
    }

    /// Number of waiting entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Whether no entry is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// The size limit, if any.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Synchronous form of `offer`.
    pub fn try_push(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }

        {
            let mut items = self.inner.items.lock();
            if self.inner.capacity.is_some_and(|capacity| items.len() >= capacity) {
                trace!(capacity = ?self.inner.capacity, "queue full, rejecting entry");
                return false;
            }
            items.push_back(item);
        }

        self.inner.available.notify_one();
        true
    }

    /// Synchronous form of `poll`.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.items.lock().pop_front()
    }
}

impl<T> Clone for MemoryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for MemoryQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl<T> BlockingQueue<T> for MemoryQueue<T>
where
    T: Send + 'static,
{
    async fn offer(&self, item: T) -> bool {
        self.try_push(item)
    }

    async fn poll(&self) -> Option<T> {
        self.try_pop()
    }

    async fn take(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_pop();
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn size(&self) -> Option<usize> {
        Some(self.len())
    }

    async fn clear(&self) {
        self.inner.items.lock().clear();
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::unbounded();

        assert!(queue.offer("a").await);
        assert!(queue.offer("b").await);

        assert_eq!(queue.size().await, Some(2));
        assert_eq!(queue.poll().await, Some("a"));
        assert_eq!(queue.take(None).await, Some("b"));
        assert_eq!(queue.poll().await, None);
    }

    #[tokio::test]
    async fn test_bounded_rejects_when_full() {
        let queue = MemoryQueue::bounded(1);

        assert!(queue.offer(1).await);
        assert!(!queue.offer(2).await);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_take_times_out() {
        let queue = MemoryQueue::<u32>::unbounded();

        let started = Instant::now();
        assert_eq!(queue.take(Some(Duration::from_millis(50))).await, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_take_waits_for_offer() {
        let queue = MemoryQueue::unbounded();
        let producer = queue.clone();

        let consumer = tokio::spawn(async move { queue.take(Some(Duration::from_secs(5))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(producer.offer("late").await);

        assert_eq!(consumer.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn test_close_wakes_takers_and_rejects_offers() {
        let queue = MemoryQueue::<u32>::unbounded();
        let closer = queue.clone();

        let consumer = tokio::spawn(async move { queue.take(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close().await;

        assert_eq!(consumer.await.unwrap(), None);
        assert!(!closer.offer(1).await);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = MemoryQueue::unbounded();
        queue.offer(1).await;
        queue.offer(2).await;

        queue.clear().await;

        assert!(queue.is_empty());
        assert_eq!(queue.size().await, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_consumers_receive_each_entry_once() {
        let queue = MemoryQueue::unbounded();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut received = Vec::new();
                    while let Some(item) = queue.take(Some(Duration::from_millis(200))).await {
                        received.push(item);
                    }
                    received
                })
            })
            .collect();

        for i in 0..100 {
            assert!(queue.offer(i).await);
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();

        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
