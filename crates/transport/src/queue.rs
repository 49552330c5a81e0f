use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dossier_queue::BlockingQueue;
use dossier_queue_memory::MemoryQueue;
use dossier_queue_nats::NatsQueue;

/// A queue of any backend, chosen at runtime.
#[derive(Clone)]
pub enum AnyQueue<T> {
    /// In-process FIFO.
    Memory(MemoryQueue<T>),

    /// Durable `JetStream` work queue.
    Nats(NatsQueue<T>),
}

impl<T> Debug for AnyQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(queue) => f.debug_tuple("Memory").field(queue).finish(),
            Self::Nats(queue) => f.debug_tuple("Nats").field(queue).finish(),
        }
    }
}

#[async_trait]
impl<T> BlockingQueue<T> for AnyQueue<T>
where
    T: TryFrom<Bytes> + Into<Bytes> + Send + 'static,
    T::Error: Display + Send,
{
    async fn offer(&self, item: T) -> bool {
        match self {
            Self::Memory(queue) => queue.offer(item).await,
            Self::Nats(queue) => queue.offer(item).await,
        }
    }

    async fn poll(&self) -> Option<T> {
        match self {
            Self::Memory(queue) => queue.poll().await,
            Self::Nats(queue) => queue.poll().await,
        }
    }

    async fn take(&self, timeout: Option<Duration>) -> Option<T> {
        match self {
            Self::Memory(queue) => queue.take(timeout).await,
            Self::Nats(queue) => queue.take(timeout).await,
        }
    }

    async fn size(&self) -> Option<usize> {
        match self {
            Self::Memory(queue) => queue.size().await,
            Self::Nats(queue) => queue.size().await,
        }
    }

    async fn clear(&self) {
        match self {
            Self::Memory(queue) => queue.clear().await,
            Self::Nats(queue) => queue.clear().await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Memory(queue) => queue.close().await,
            Self::Nats(queue) => queue.close().await,
        }
    }
}
