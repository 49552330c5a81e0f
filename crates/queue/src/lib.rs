//! Abstract interface for ordered point-to-point work queues.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// A FIFO shared by producers and competing consumers.
///
/// Every entry is handed to exactly one consumer. Operations never return
/// errors: failures surface as `false` or `None` and are logged by the
/// implementation, so producer and consumer loops stay simple.
#[async_trait]
pub trait BlockingQueue<T>
where
    Self: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Appends `item` without waiting. Returns `false` if the queue rejected it
    /// (full, closed or backing store unreachable).
    async fn offer(&self, item: T) -> bool;

    /// Removes the head of the queue if one is immediately available.
    async fn poll(&self) -> Option<T>;

    /// Waits for the head of the queue, at most `timeout` if one is given.
    /// Returns `None` on timeout or once the queue is closed and empty.
    async fn take(&self, timeout: Option<Duration>) -> Option<T>;

    /// Number of waiting entries, or `None` when it cannot be determined.
    async fn size(&self) -> Option<usize>;

    /// Drops every waiting entry.
    async fn clear(&self);

    /// Rejects further offers and wakes every waiting `take`.
    async fn close(&self);
}
