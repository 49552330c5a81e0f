//! In-process implementation of the bus contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dossier_bus::{Channel, DataBus, Message, OnRegistered, ShutdownMessage, Subscriber};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Registration {
    subscriber: Subscriber,
    channels: HashSet<Channel>,
    delivered: AtomicUsize,
    stopping: AtomicBool,
    stop: watch::Sender<bool>,
}

type Registrations = Arc<DashMap<Uuid, Arc<Registration>>>;

/// Removes the registration when the receive loop ends or is cancelled.
struct RegistrationGuard {
    registrations: Registrations,
    registration: Arc<Registration>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let id = self.registration.subscriber.id();
        self.registrations
            .remove_if(&id, |_, current| Arc::ptr_eq(current, &self.registration));
    }
}

/// Bus whose `publish` runs every matching handler inline before returning.
#[derive(Clone, Debug, Default)]
pub struct MemoryDataBus {
    registrations: Registrations,
}

impl MemoryDataBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registrations.len()
    }

    /// Hands `message` to one registration on the calling task.
    ///
    /// A registration sees exactly one SHUTDOWN and nothing after it: the
    /// first SHUTDOWN unregisters it before the handler runs, so a handler
    /// may publish or unsubscribe without reaching itself again.
    async fn dispatch(
        &self,
        registration: &Arc<Registration>,
        channel: Option<Channel>,
        message: Message,
    ) {
        let shutdown = message.is_shutdown();

        if shutdown {
            if registration.stopping.swap(true, Ordering::SeqCst) {
                return;
            }
            let id = registration.subscriber.id();
            self.registrations
                .remove_if(&id, |_, current| Arc::ptr_eq(current, registration));
        } else if registration.stopping.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = registration.subscriber.deliver(message).await {
            warn!(subscriber = %registration.subscriber.id(), channel = ?channel, error = %e, "subscriber failed to handle message");
        }
        registration.delivered.fetch_add(1, Ordering::SeqCst);

        if shutdown {
            registration.stop.send_replace(true);
        }
    }
}

#[async_trait]
impl DataBus for MemoryDataBus {
    type Error = Error;

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
        let registration = Arc::new(Registration {
            subscriber,
            channels: channels.iter().copied().collect(),
            delivered: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            stop,
        });

        match self.registrations.entry(id) {
            Entry::Occupied(_) => return Err(Error::AlreadySubscribed(id)),
            Entry::Vacant(entry) => {
                entry.insert(registration.clone());
            }
        }

        let _guard = RegistrationGuard {
            registrations: self.registrations.clone(),
            registration: registration.clone(),
        };

        on_registered();

        // The sender lives in `registration`, which we hold, so this only returns once stopped.
        let _ = stopped.wait_for(|stopped| *stopped).await;

        let delivered = registration.delivered.load(Ordering::SeqCst);
        debug!(subscriber = %id, delivered, "receive loop ended");

        Ok(delivered)
    }

    async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<(), Self::Error> {
        if let Some((_, registration)) = self.registrations.remove(&subscriber.id()) {
            debug!(subscriber = %subscriber.id(), "unsubscribing");
            self.dispatch(&registration, None, ShutdownMessage.into())
                .await;
        }

        Ok(())
    }

    async fn publish(&self, channel: Channel, message: Message) -> Result<(), Self::Error> {
        let targets: Vec<Arc<Registration>> = self
            .registrations
            .iter()
            .filter(|entry| entry.channels.contains(&channel))
            .map(|entry| entry.value().clone())
            .collect();

        for registration in targets {
            self.dispatch(&registration, Some(channel), message.clone())
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use dossier_bus::{HandlerError, MessageHandler, MessageType};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Records the type of every message its subscribers receive.
    #[derive(Clone, Default)]
    struct Recorded(Arc<std::sync::Mutex<Vec<MessageType>>>);

    impl Recorded {
        fn subscriber(&self) -> Subscriber {
            let seen = self.0.clone();
            Subscriber::from_fn(move |message: Message| {
                seen.lock().unwrap().push(message.message_type());
                Ok(())
            })
        }

        fn types(&self) -> Vec<MessageType> {
            self.0.lock().unwrap().clone()
        }
    }

    async fn spawn_subscription(
        bus: &MemoryDataBus,
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
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscription did not terminate")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_loop_with_shutdown() {
        let bus = MemoryDataBus::new();
        let recorded = Recorded::default();
        let subscriber = recorded.subscriber();

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Test]).await;
        bus.unsubscribe(&subscriber).await.unwrap();

        assert_eq!(join(handle).await, 1);
        assert_eq!(recorded.types(), vec![MessageType::Shutdown]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = MemoryDataBus::new();
        let subscriber = Recorded::default().subscriber();

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Test]).await;
        bus.unsubscribe(&subscriber).await.unwrap();
        bus.unsubscribe(&subscriber).await.unwrap();

        assert_eq!(join(handle).await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_subscriber() {
        let bus = MemoryDataBus::new();

        bus.unsubscribe(&Recorded::default().subscriber())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_channel_isolation() {
        let bus = MemoryDataBus::new();
        let recorded = Recorded::default();

        let handle = spawn_subscription(&bus, recorded.subscriber(), vec![Channel::Test]).await;
        bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Test, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(handle).await, 1);
        assert_eq!(recorded.types(), vec![MessageType::Shutdown]);
    }

    #[tokio::test]
    async fn test_shutdown_on_any_subscribed_channel() {
        let bus = MemoryDataBus::new();
        let recorded = Recorded::default();

        let handle = spawn_subscription(
            &bus,
            recorded.subscriber(),
            vec![Channel::Nlp, Channel::Test],
        )
        .await;
        bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Test, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(handle).await, 2);
    }

    #[tokio::test]
    async fn test_two_subscribers_each_receive_everything() {
        let bus = MemoryDataBus::new();
        let first = Recorded::default();
        let second = Recorded::default();

        let h1 = spawn_subscription(&bus, first.subscriber(), vec![Channel::Test]).await;
        let h2 = spawn_subscription(&bus, second.subscriber(), vec![Channel::Test]).await;
        bus.publish(Channel::Test, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Test, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(h1).await + join(h2).await, 4);
        assert_eq!(first.types(), second.types());
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = MemoryDataBus::new();
        let healthy = Recorded::default();
        let failing = Subscriber::from_fn(|message: Message| {
            if message.is_shutdown() {
                Ok(())
            } else {
                Err("cannot handle".into())
            }
        });
        let panicking = Subscriber::from_fn(|message: Message| {
            assert!(message.is_shutdown(), "not a shutdown");
            Ok(())
        });

        let h1 = spawn_subscription(&bus, failing, vec![Channel::Nlp]).await;
        let h2 = spawn_subscription(&bus, panicking, vec![Channel::Nlp]).await;
        let h3 = spawn_subscription(&bus, healthy.subscriber(), vec![Channel::Nlp]).await;
        bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(h1).await, 2);
        assert_eq!(join(h2).await, 2);
        assert_eq!(join(h3).await, 2);
        assert_eq!(
            healthy.types(),
            vec![MessageType::ExtractNlp, MessageType::Shutdown]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_n_subscribers_m_messages() {
        const SUBSCRIBERS: usize = 5;
        const MESSAGES: usize = 20;

        let bus = MemoryDataBus::new();
        let mut handles = Vec::new();
        for _ in 0..SUBSCRIBERS {
            handles.push(
                spawn_subscription(&bus, Recorded::default().subscriber(), vec![Channel::Nlp])
                    .await,
            );
        }

        let publishers: Vec<_> = (0..MESSAGES)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    bus.publish(Channel::Nlp, Message::new(MessageType::ExtractNlp))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.unwrap();
        }
        bus.publish(Channel::Nlp, ShutdownMessage.into())
            .await
            .unwrap();

        let mut total = 0;
        for handle in handles {
            total += join(handle).await;
        }

        assert_eq!(total, SUBSCRIBERS * (MESSAGES + 1));
    }

    #[tokio::test]
    async fn test_double_subscribe_is_rejected() {
        let bus = MemoryDataBus::new();
        let subscriber = Recorded::default().subscriber();

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Test]).await;
        let result = bus.subscribe(subscriber.clone(), &[Channel::Nlp]).await;

        assert!(matches!(result, Err(Error::AlreadySubscribed(id)) if id == subscriber.id()));
        bus.unsubscribe(&subscriber).await.unwrap();
        assert_eq!(join(handle).await, 1);
    }

    #[tokio::test]
    async fn test_nothing_is_delivered_after_shutdown() {
        let bus = MemoryDataBus::new();
        let recorded = Recorded::default();
        let subscriber = recorded.subscriber();

        let handle = spawn_subscription(&bus, subscriber.clone(), vec![Channel::Test]).await;
        bus.publish(Channel::Test, ShutdownMessage.into())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(Channel::Test, Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();
        bus.unsubscribe(&subscriber).await.unwrap();

        assert_eq!(join(handle).await, 1);
        assert_eq!(recorded.types(), vec![MessageType::Shutdown]);
    }

    /// Answers INIT_MONITORING with an extraction on the same channel.
    struct Echo {
        bus: MemoryDataBus,
        recorded: Recorded,
    }

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: Message) -> Result<(), HandlerError> {
            self.recorded.0.lock().unwrap().push(message.message_type());
            if message.message_type() == MessageType::InitMonitoring {
                self.bus
                    .publish(Channel::Test, Message::new(MessageType::ExtractNlp))
                    .await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_can_publish_on_its_own_channel() {
        let bus = MemoryDataBus::new();
        let recorded = Recorded::default();
        let echo = Subscriber::new(Echo {
            bus: bus.clone(),
            recorded: recorded.clone(),
        });

        let handle = spawn_subscription(&bus, echo, vec![Channel::Test]).await;
        timeout(
            Duration::from_secs(2),
            bus.publish(Channel::Test, Message::new(MessageType::InitMonitoring)),
        )
        .await
        .expect("publish from a handler deadlocked")
        .unwrap();
        bus.publish(Channel::Test, ShutdownMessage.into())
            .await
            .unwrap();

        assert_eq!(join(handle).await, 3);
        assert_eq!(
            recorded.types(),
            vec![
                MessageType::InitMonitoring,
                MessageType::ExtractNlp,
                MessageType::Shutdown
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribe_without_channels_is_rejected() {
        let bus = MemoryDataBus::new();

        assert_matches!(
            bus.subscribe(Recorded::default().subscriber(), &[]).await,
            Err(Error::NoChannels)
        );
        assert_eq!(bus.subscriber_count(), 0);
    }
}
