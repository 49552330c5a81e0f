//! Distributed work queue on a NATS `JetStream` work-queue stream.
//!
//! Every handle opened with the same prefix and name shares one stream and one
//! durable pull consumer, so entries are handed to exactly one of the
//! competing consumers across processes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{self, Debug, Display, Formatter};
use std::marker::PhantomData;
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream::consumer::{AckPolicy, Consumer, DeliverPolicy, pull};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind, Context};
use async_trait::async_trait;
use bytes::Bytes;
use dossier_bus_nats::{ConnectionOptions, connect_with_retry};
use dossier_queue::BlockingQueue;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix of stream and subject names when none is configured.
pub const DEFAULT_PREFIX: &str = "dossier";

/// Longest single pull request issued by an unbounded `take`.
const MAX_PULL_WAIT: Duration = Duration::from_secs(30);

/// Durable FIFO shared by every handle opened on the same name.
///
/// Entries are acknowledged when dequeued. `close` is local to the handle and
/// its clones: it stops offers and wakes waiting `take` calls, other handles
/// keep working.
pub struct NatsQueue<T> {
    name: String,
    stream: String,
    subject: String,
    context: Context,
    consumer: Consumer<pull::Config>,
    closed: CancellationToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for NatsQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            stream: self.stream.clone(),
            subject: self.subject.clone(),
            context: self.context.clone(),
            consumer: self.consumer.clone(),
            closed: self.closed.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for NatsQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsQueue")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .field("subject", &self.subject)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T> NatsQueue<T> {
    /// Connects within the retry budget and opens the queue `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectRetriesExhausted`] if the server cannot be
    /// reached, or an error if the stream or consumer cannot be created.
    pub async fn connect(
        connection: &ConnectionOptions,
        prefix: &str,
        name: &str,
    ) -> Result<Self, Error> {
        let client = connect_with_retry(connection).await?;

        Self::open(client, prefix, name).await
    }

    /// Opens the queue `name` on an established connection, creating its
    /// stream and shared consumer if needed.
    ///
    /// # Errors
    ///
    /// Fails if the stream or consumer cannot be created.
    pub async fn open(client: Client, prefix: &str, name: &str) -> Result<Self, Error> {
        let context = jetstream::new(client);
        let stream = stream_name(prefix, name);
        let subject = format!("{prefix}.queue.{name}");

        let handle = context
            .get_or_create_stream(StreamConfig {
                name: stream.clone(),
                subjects: vec![subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Stream {
                stream: stream.clone(),
                reason: e.to_string(),
            })?;

        let consumer_name = format!("{stream}_workers");
        let consumer = handle
            .get_or_create_consumer(
                &consumer_name,
                pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Consumer {
                consumer: consumer_name,
                reason: e.to_string(),
            })?;

        info!(queue = %name, stream = %stream, "nats queue opened");

        Ok(Self {
            name: name.to_string(),
            stream,
            subject,
            context,
            consumer,
            closed: CancellationToken::new(),
            _marker: PhantomData,
        })
    }

    /// The queue name this handle was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Queue names may contain `:`, stream names may not.
fn stream_name(prefix: &str, name: &str) -> String {
    let sanitized: String = format!("{prefix}_QUEUE_{name}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    sanitized
}

impl<T> NatsQueue<T>
where
    T: TryFrom<Bytes>,
    T::Error: Display,
{
    /// Acks a pulled entry and decodes it. Entries that cannot be decoded are
    /// terminated so they are not handed out again.
    async fn settle(&self, message: jetstream::Message) -> Option<T> {
        match T::try_from(message.payload.clone()) {
            Ok(item) => {
                if let Err(e) = message.ack().await {
                    warn!(queue = %self.name, error = %e, "failed to ack entry");
                }
                Some(item)
            }
            Err(e) => {
                warn!(queue = %self.name, error = %e, "dropping malformed entry");
                if let Err(e) = message.ack_with(AckKind::Term).await {
                    warn!(queue = %self.name, error = %e, "failed to terminate entry");
                }
                None
            }
        }
    }

    /// One pull request for a single entry, waiting at most `wait`.
    async fn pull(&self, wait: Duration) -> Option<jetstream::Message> {
        let batch = self
            .consumer
            .batch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await;

        match batch {
            Ok(mut batch) => match batch.next().await {
                Some(Ok(message)) => Some(message),
                Some(Err(e)) => {
                    debug!(queue = %self.name, error = %e, "pull request ended");
                    None
                }
                None => None,
            },
            Err(e) => {
                warn!(queue = %self.name, error = %e, "pull request failed");
                None
            }
        }
    }
}

#[async_trait]
impl<T> BlockingQueue<T> for NatsQueue<T>
where
    T: TryFrom<Bytes> + Into<Bytes> + Send + 'static,
    T::Error: Display + Send,
{
    async fn offer(&self, item: T) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }

        let ack = match self.context.publish(self.subject.clone(), item.into()).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "failed to offer entry");
                return false;
            }
        };

        match ack.await {
            Ok(_) => true,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "entry was not stored");
                false
            }
        }
    }

    async fn poll(&self) -> Option<T> {
        let fetched = self.consumer.fetch().max_messages(1).messages().await;

        let message = match fetched {
            Ok(mut batch) => match batch.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(queue = %self.name, error = %e, "fetch ended");
                    return None;
                }
                None => return None,
            },
            Err(e) => {
                warn!(queue = %self.name, error = %e, "fetch failed");
                return None;
            }
        };

        self.settle(message).await
    }

    async fn take(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if self.closed.is_cancelled() {
                return None;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    remaining.min(MAX_PULL_WAIT)
                }
                None => MAX_PULL_WAIT,
            };

            let pulled = tokio::select! {
                () = self.closed.cancelled() => return None,
                pulled = self.pull(wait) => pulled,
            };

            if let Some(message) = pulled {
                if let Some(item) = self.settle(message).await {
                    return Some(item);
                }
            }
        }
    }

    async fn size(&self) -> Option<usize> {
        if self.closed.is_cancelled() {
            return None;
        }

        let mut stream = match self.context.get_stream(&self.stream).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "failed to look up stream");
                return None;
            }
        };

        match stream.info().await {
            Ok(info) => usize::try_from(info.state.messages).ok(),
            Err(e) => {
                warn!(queue = %self.name, error = %e, "failed to read stream info");
                None
            }
        }
    }

    async fn clear(&self) {
        let stream = match self.context.get_stream(&self.stream).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "failed to look up stream");
                return;
            }
        };

        match stream.purge().await {
            Ok(purged) => debug!(queue = %self.name, purged = purged.purged, "queue cleared"),
            Err(e) => warn!(queue = %self.name, error = %e, "failed to clear queue"),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        debug!(queue = %self.name, "queue closed");
    }
}
