//! Reliable bus and event queues on NATS `JetStream`.
//!
//! Every channel is backed by a durable stream and every subscription by a
//! durable pull consumer, so a message is removed only once the handler
//! succeeded and is redelivered otherwise.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;
mod event;
mod naming;
mod publisher;
mod pull;
mod state;

pub use consumer::{EventConsumer, EventConsumerOptions, EventHandler};
pub use error::Error;
pub use event::{Event, EventQueue, TaskEvent};
pub use publisher::EventPublisher;
pub use state::ConsumerState;

use naming::Naming;
use pull::{ConsumerSpec, Outcome, consume};
use state::StateCell;

use std::sync::Arc;

use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull as nats_pull};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dossier_bus::{Channel, DataBus, Message, OnRegistered, Subscriber};
use dossier_bus_nats::{ConnectionOptions, RetryPolicy, connect_with_retry};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Prefix used for streams and subjects when none is configured.
pub const DEFAULT_PREFIX: &str = "dossier";

/// Options for [`JetStreamDataBus`].
#[derive(Clone, Debug)]
pub struct JetStreamDataBusOptions {
    /// How to reach the server, including the startup retry budget.
    pub connection: ConnectionOptions,

    /// Prefix of every stream, subject and consumer name.
    pub prefix: String,

    /// Budget for re-attaching a consumer after a connection error.
    pub retry: RetryPolicy,
}

impl Default for JetStreamDataBusOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct Registration {
    stop: CancellationToken,
    state: StateCell,
}

/// Removes the registration when the receive loop ends or is cancelled.
struct RegistrationGuard<'a> {
    registrations: &'a DashMap<Uuid, Registration>,
    id: Uuid,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.registrations.remove(&self.id);
    }
}

/// Broker-backed bus with per-message acknowledgement.
#[derive(Clone, Debug)]
pub struct JetStreamDataBus {
    context: Context,
    naming: Naming,
    retry: RetryPolicy,
    registrations: Arc<DashMap<Uuid, Registration>>,
}

impl JetStreamDataBus {
    /// Connects within the retry budget and ensures one stream per channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectRetriesExhausted`] if the server cannot be
    /// reached, or a stream error if the channel streams cannot be created.
    pub async fn connect(options: JetStreamDataBusOptions) -> Result<Self, Error> {
        let client = connect_with_retry(&options.connection).await?;
        let context = jetstream::new(client);
        let naming = Naming::new(options.prefix);

        for channel in Channel::ALL {
            let config = channel_stream_config(&naming, *channel);
            let stream = config.name.clone();
            context
                .get_or_create_stream(config)
                .await
                .map_err(|e| Error::Stream {
                    stream,
                    reason: e.to_string(),
                })?;
        }
        info!(streams = Channel::ALL.len(), "jetstream bus ready");

        Ok(Self {
            context,
            naming,
            retry: options.retry,
            registrations: Arc::new(DashMap::new()),
        })
    }

    /// Publisher for events of type `E`.
    #[must_use]
    pub fn event_publisher<E>(&self) -> EventPublisher<E>
    where
        E: Event,
    {
        EventPublisher::new(self.context.clone(), self.naming.clone())
    }

    /// Consumer of the `queue` events, not yet started.
    pub fn event_consumer<E, H>(
        &self,
        queue: EventQueue,
        handler: H,
        options: EventConsumerOptions,
    ) -> EventConsumer<E, H>
    where
        E: Event,
        H: EventHandler<E>,
    {
        EventConsumer::new(self.context.clone(), &self.naming, queue, handler, options)
    }

    /// State of the receive loop of `subscriber`, if it is subscribed.
    #[must_use]
    pub fn consumer_state(&self, subscriber: &Subscriber) -> Option<ConsumerState> {
        self.registrations
            .get(&subscriber.id())
            .map(|registration| registration.state.get())
    }

    fn consumer_spec(&self, channel: Channel, id: Uuid) -> ConsumerSpec {
        let name = format!(
            "{}_{}",
            self.naming.channel_stream(channel),
            id.simple()
        );

        ConsumerSpec {
            stream: channel_stream_config(&self.naming, channel),
            name: name.clone(),
            config: nats_pull::Config {
                durable_name: Some(name),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: DeliverPolicy::New,
                ..Default::default()
            },
        }
    }
}

fn channel_stream_config(naming: &Naming, channel: Channel) -> StreamConfig {
    StreamConfig {
        name: naming.channel_stream(channel),
        subjects: vec![naming.channel_subject(channel)],
        retention: RetentionPolicy::Interest,
        storage: StorageType::File,
        ..Default::default()
    }
}

async fn deliver(subscriber: &Subscriber, serial: &Mutex<()>, payload: Bytes) -> Outcome {
    let message = match Message::try_from(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(subscriber = %subscriber.id(), error = %e, "terminating malformed message");
            return Outcome::Term;
        }
    };

    let _serial = serial.lock().await;
    let shutdown = message.is_shutdown();

    match subscriber.deliver(message).await {
        Ok(()) if shutdown => Outcome::AckAndStop,
        Ok(()) => Outcome::Ack,
        Err(e) if shutdown => {
            warn!(subscriber = %subscriber.id(), error = %e, "subscriber failed to handle shutdown");
            Outcome::AckAndStop
        }
        Err(e) => {
            warn!(subscriber = %subscriber.id(), error = %e, "subscriber failed, message will be redelivered");
            Outcome::Nak
        }
    }
}

#[async_trait]
impl DataBus for JetStreamDataBus {
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
        let stop = CancellationToken::new();
        let state = StateCell::new();

        match self.registrations.entry(id) {
            Entry::Occupied(_) => return Err(Error::AlreadySubscribed(id)),
            Entry::Vacant(entry) => {
                entry.insert(Registration {
                    stop: stop.clone(),
                    state: state.clone(),
                });
            }
        }
        let _guard = RegistrationGuard {
            registrations: &self.registrations,
            id,
        };

        state.set(ConsumerState::Connecting);
        let specs: Vec<ConsumerSpec> = channels
            .iter()
            .map(|channel| self.consumer_spec(*channel, id))
            .collect();

        let mut streams = Vec::with_capacity(specs.len());
        for spec in &specs {
            match spec.open(&self.context, self.retry).await {
                Ok(messages) => streams.push(messages),
                Err(e) => {
                    for spec in &specs {
                        spec.delete(&self.context).await;
                    }
                    state.set(ConsumerState::Disconnected);
                    return Err(e);
                }
            }
        }

        on_registered();

        let serial = Mutex::new(());
        let (subscriber, serial) = (&subscriber, &serial);
        let loops = specs.iter().zip(streams).map(|(spec, messages)| {
            let (context, state, stop) = (&self.context, &state, &stop);
            async move {
                let result = consume(context, spec, self.retry, state, stop, messages, move |payload| {
                    deliver(subscriber, serial, payload)
                })
                .await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            }
        });
        let results = join_all(loops).await;

        for spec in &specs {
            spec.delete(&self.context).await;
        }

        let mut delivered = 0;
        for result in results {
            delivered += result?;
        }
        debug!(delivered, "receive loops ended");

        Ok(delivered)
    }

    async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<(), Self::Error> {
        if let Some((_, registration)) = self.registrations.remove(&subscriber.id()) {
            registration.stop.cancel();
        }

        Ok(())
    }

    async fn publish(&self, channel: Channel, message: Message) -> Result<(), Self::Error> {
        let subject = self.naming.channel_subject(channel);
        let publish_error = |e: &dyn std::fmt::Display| Error::Publish {
            subject: subject.clone(),
            reason: e.to_string(),
        };

        self.context
            .publish(subject.clone(), Bytes::from(message))
            .await
            .map_err(|e| publish_error(&e))?
            .await
            .map_err(|e| publish_error(&e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use dossier_bootable::Bootable;
    use dossier_bus::{HandlerError, MessageType, ShutdownMessage};
    use serial_test::serial;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    async fn bus() -> JetStreamDataBus {
        JetStreamDataBus::connect(JetStreamDataBusOptions {
            prefix: format!("dossier-test-{}", Uuid::new_v4().simple()),
            ..JetStreamDataBusOptions::default()
        })
        .await
        .unwrap()
    }

    async fn spawn_subscription(
        bus: &JetStreamDataBus,
        subscriber: Subscriber,
        channels: Vec<Channel>,
    ) -> JoinHandle<Result<usize, Error>> {
        let (registered, on_registered) = oneshot::channel();
        let bus = bus.clone();
        let handle = tokio::spawn(async move {
            bus.subscribe_with_callback(
                subscriber,
                Box::new(move || {
                    let _ = registered.send(());
                }),
                &channels,
            )
            .await
        });
        on_registered.await.unwrap();
        handle
    }

    async fn join(handle: JoinHandle<Result<usize, Error>>) -> usize {
        timeout(Duration::from_secs(10), handle)
            .await
            .expect("subscription did not terminate")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_without_channels_is_rejected() {
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect("nats://127.0.0.1:1")
            .await
            .unwrap();
        let bus = JetStreamDataBus {
            context: jetstream::new(client),
            naming: Naming::new(DEFAULT_PREFIX),
            retry: RetryPolicy::default(),
            registrations: Arc::new(DashMap::new()),
        };
        let subscriber = Subscriber::from_fn(|_| Ok(()));

        assert_matches!(
            bus.subscribe(subscriber.clone(), &[]).await,
            Err(Error::NoChannels)
        );
        assert_eq!(bus.consumer_state(&subscriber), None);
    }

    #[tokio::test]
    async fn test_connect_retries_are_bounded() {
        let options = JetStreamDataBusOptions {
            connection: ConnectionOptions {
                retry: RetryPolicy {
                    attempts: 2,
                    backoff: Duration::from_millis(10),
                },
                connection_timeout: Duration::from_millis(500),
                ..ConnectionOptions::new("nats://127.0.0.1:1")
            },
            ..JetStreamDataBusOptions::default()
        };

        assert_matches!(
            JetStreamDataBus::connect(options).await,
            Err(Error::ConnectRetriesExhausted(exhausted)) if exhausted.attempts == 2
        );
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running NATS server"]
    async fn test_shutdown_ends_subscription() {
        let bus = bus().await;
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let subscriber = Subscriber::from_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Nlp]).await;
        assert_eq!(bus.consumer_state(&subscriber), Some(ConsumerState::Consuming));

        bus.publish(Channel::Test, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(handle).await, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.consumer_state(&subscriber), None);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running NATS server"]
    async fn test_failed_message_is_redelivered() {
        let bus = bus().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let subscriber = Subscriber::from_fn(move |message: Message| {
            if !message.is_shutdown() && seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("transient".into());
            }
            Ok(())
        });

        let handle = spawn_subscription(&bus, subscriber, vec![Channel::Nlp]).await;
        bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(handle).await, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running NATS server"]
    async fn test_unsubscribe_is_idempotent() {
        let bus = bus().await;
        let subscriber = Subscriber::from_fn(|_| Ok(()));

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Event]).await;
        bus.unsubscribe(&subscriber).await.unwrap();
        bus.unsubscribe(&subscriber).await.unwrap();

        assert_eq!(join(handle).await, 0);
    }

    struct Forward(mpsc::UnboundedSender<TaskEvent>);

    #[async_trait]
    impl EventHandler<TaskEvent> for Forward {
        async fn save(&self, event: TaskEvent) -> Result<(), HandlerError> {
            self.0.send(event)?;
            Ok(())
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running NATS server"]
    async fn test_task_events_round_trip() {
        let bus = bus().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let consumer = bus.event_consumer(
            EventQueue::Task,
            Forward(sender),
            EventConsumerOptions::default(),
        );
        let publisher = bus.event_publisher::<TaskEvent>();
        let event = TaskEvent::Error {
            task_id: "task".to_string(),
            error: "boom".to_string(),
        };

        consumer.start().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Consuming);
        publisher.publish(EventQueue::Task, &event).await.unwrap();

        let received = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, event);

        consumer.shutdown().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
        assert!(consumer.start().await.is_err());
    }
}
