//! Bus backed by NATS core subjects, one connection per subscriber.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connection settings and bounded retry shared by the NATS backends.
pub mod connection;

mod error;

pub use connection::{ConnectionOptions, RetryPolicy, connect_with_retry, with_retry};
pub use error::{Error, RetriesExhausted};

use std::sync::Arc;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dossier_bus::{Channel, DataBus, Message, OnRegistered, Subscriber};
use futures::StreamExt;
use futures::stream::select_all;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Options for [`NatsDataBus`].
#[derive(Clone, Debug, Default)]
pub struct NatsDataBusOptions {
    /// How to reach the server.
    pub connection: ConnectionOptions,

    /// Prepended to channel names to build subjects.
    pub subject_prefix: String,
}

/// Remote bus on plain NATS subjects.
///
/// Publishing goes through one shared connection and returns once the message
/// is handed to the client. Each subscription opens its own connection and
/// runs its receive loop on the task awaiting `subscribe`; `unsubscribe`
/// stops that loop, which closes the connection.
#[derive(Clone, Debug)]
pub struct NatsDataBus {
    publisher: Client,
    options: NatsDataBusOptions,
    subscriptions: Arc<DashMap<Uuid, Arc<watch::Sender<bool>>>>,
}

/// Removes the registration when the receive loop ends, fails or is cancelled.
struct SubscriptionGuard<'a> {
    subscriptions: &'a DashMap<Uuid, Arc<watch::Sender<bool>>>,
    id: Uuid,
    stop: Arc<watch::Sender<bool>>,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.subscriptions
            .remove_if(&self.id, |_, current| Arc::ptr_eq(current, &self.stop));
    }
}

impl NatsDataBus {
    /// Connects the publishing client.
    ///
    /// # Errors
    ///
    /// Fails if the server cannot be reached within the retry budget.
    pub async fn connect(options: NatsDataBusOptions) -> Result<Self, Error> {
        let publisher = connect_with_retry(&options.connection).await?;

        Ok(Self {
            publisher,
            options,
            subscriptions: Arc::new(DashMap::new()),
        })
    }

    /// Subject carrying `channel`.
    #[must_use]
    pub fn subject(&self, channel: Channel) -> String {
        format!("{}{}", self.options.subject_prefix, channel)
    }

    /// Number of active receive loops.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[async_trait]
impl DataBus for NatsDataBus {
    type Error = Error;

    #[instrument(skip_all, fields(subscriber = %subscriber.id()))]
    async fn subscribe_with_callback(
        &self,
        subscriber: Subscriber,
        on_registered: OnRegistered,
        channels: &[Channel],
    ) -> Result<usize, Self::Error> {
        if channels.is_empty() {
            return Err(Error::NoChannels);
        }

        let id = subscriber.id();
        let (stop, mut stopped) = watch::channel(false);
        let stop = Arc::new(stop);
        match self.subscriptions.entry(id) {
            Entry::Occupied(_) => return Err(Error::AlreadySubscribed(id)),
            Entry::Vacant(entry) => {
                entry.insert(stop.clone());
            }
        }
        let _guard = SubscriptionGuard {
            subscriptions: &self.subscriptions,
            id,
            stop,
        };

        let connection = tokio::select! {
            _ = stopped.changed() => {
                debug!("unsubscribed while connecting");
                return Ok(0);
            }
            connection = connect_with_retry(&self.options.connection) => connection?,
        };

        let mut subscriptions = Vec::with_capacity(channels.len());
        for channel in channels {
            let subject = self.subject(*channel);
            let subscription = connection
                .subscribe(subject.clone())
                .await
                .map_err(|e| Error::Subscribe {
                    subject,
                    reason: e.to_string(),
                })?;
            subscriptions.push(subscription);
        }
        connection
            .flush()
            .await
            .map_err(|e| Error::Flush(e.to_string()))?;

        on_registered();

        let mut incoming = select_all(subscriptions);
        let mut delivered = 0;

        loop {
            tokio::select! {
                _ = stopped.changed() => {
                    debug!("unsubscribed");
                    break;
                }
                message = incoming.next() => {
                    let Some(message) = message else {
                        debug!("connection closed");
                        break;
                    };

                    let message = match Message::try_from(message.payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(subject = %message.subject, error = %e, "dropping malformed message");
                            continue;
                        }
                    };

                    let shutdown = message.is_shutdown();
                    if let Err(e) = subscriber.deliver(message).await {
                        warn!(error = %e, "subscriber failed to handle message");
                    }
                    delivered += 1;

                    if shutdown {
                        debug!("shutdown received");
                        break;
                    }
                }
            }
        }

        drop(incoming);
        drop(connection);

        info!(delivered, "receive loop ended");

        Ok(delivered)
    }

    async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<(), Self::Error> {
        if let Some((_, stop)) = self.subscriptions.remove(&subscriber.id()) {
            stop.send_replace(true);
        }

        Ok(())
    }

    async fn publish(&self, channel: Channel, message: Message) -> Result<(), Self::Error> {
        let subject = self.subject(channel);

        self.publisher
            .publish(subject.clone(), Bytes::from(message))
            .await
            .map_err(|e| Error::Publish {
                subject,
                reason: e.to_string(),
            })
    }
}
