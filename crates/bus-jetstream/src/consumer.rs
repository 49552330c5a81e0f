use crate::Error;
use crate::event::{Event, EventQueue};
use crate::naming::Naming;
use crate::publisher::event_stream_config;
use crate::pull::{ConsumerSpec, Outcome, consume};
use crate::state::{ConsumerState, StateCell};

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::Context;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull};
use async_trait::async_trait;
use dossier_bootable::{Bootable, BootableError};
use dossier_bus::HandlerError;
use dossier_bus::panic_guard::catch_panic;
use dossier_bus_nats::RetryPolicy;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Side effect applied to every consumed event, typically persisting it.
#[async_trait]
pub trait EventHandler<E>
where
    Self: Send + Sync + 'static,
    E: Event,
{
    /// Handles `event`. An error returns the event to the queue for redelivery.
    async fn save(&self, event: E) -> Result<(), HandlerError>;
}

/// Options for [`EventConsumer`].
#[derive(Clone, Debug)]
pub struct EventConsumerOptions {
    /// Budget for attaching and re-attaching the consumer.
    pub retry: RetryPolicy,

    /// How long `shutdown` waits for the receive loop to exit.
    pub shutdown_timeout: Duration,
}

impl Default for EventConsumerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Reliable consumer of one event queue.
///
/// Every decoded event goes to the handler and is acknowledged once the
/// handler succeeds; handler errors return it for redelivery and payloads
/// that cannot be decoded are terminated. Competing instances share one
/// durable consumer, so each event is handled by one of them.
pub struct EventConsumer<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    name: String,
    context: Context,
    spec: ConsumerSpec,
    handler: Arc<H>,
    options: EventConsumerOptions,
    state: StateCell,
    stop: CancellationToken,
    started: AtomicBool,
    finished: watch::Sender<bool>,
    _marker: PhantomData<fn() -> E>,
}

impl<E, H> EventConsumer<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    pub(crate) fn new(
        context: Context,
        naming: &Naming,
        queue: EventQueue,
        handler: H,
        options: EventConsumerOptions,
    ) -> Self {
        let name = naming.event_consumer(queue);
        let spec = ConsumerSpec {
            stream: event_stream_config(naming, queue),
            name: name.clone(),
            config: pull::Config {
                durable_name: Some(name.clone()),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: DeliverPolicy::All,
                ..Default::default()
            },
        };

        Self {
            name,
            context,
            spec,
            handler: Arc::new(handler),
            options,
            state: StateCell::new(),
            stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            finished: watch::Sender::new(false),
            _marker: PhantomData,
        }
    }

    /// Current state of the receive loop.
    pub fn state(&self) -> ConsumerState {
        self.state.get()
    }

    /// Watches state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }
}

async fn save_event<E, H>(handler: &H, payload: &[u8]) -> Outcome
where
    E: Event,
    H: EventHandler<E>,
{
    let event: E = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "dropping malformed event");
            return Outcome::Term;
        }
    };

    match catch_panic(handler.save(event)).await {
        Ok(Ok(())) => Outcome::Ack,
        Ok(Err(e)) => {
            warn!(error = %e, "event handler failed, requeueing");
            Outcome::Nak
        }
        Err(_) => Outcome::Nak,
    }
}

#[async_trait]
impl<E, H> Bootable for EventConsumer<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    fn bootable_name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), BootableError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Box::new(Error::AlreadyStarted(self.name.clone())));
        }

        self.state.set(ConsumerState::Connecting);
        let messages = match self.spec.open(&self.context, self.options.retry).await {
            Ok(messages) => messages,
            Err(e) => {
                self.state.set(ConsumerState::Disconnected);
                self.finished.send_replace(true);
                return Err(Box::new(e));
            }
        };

        let context = self.context.clone();
        let spec = self.spec.clone();
        let retry = self.options.retry;
        let state = self.state.clone();
        let stop = self.stop.clone();
        let handler = self.handler.clone();
        let finished = self.finished.clone();

        tokio::spawn(async move {
            let result = consume(&context, &spec, retry, &state, &stop, messages, |payload| {
                let handler = handler.clone();
                async move { save_event::<E, H>(handler.as_ref(), &payload).await }
            })
            .await;

            match result {
                Ok(handled) => info!(consumer = %spec.name, handled, "event consumer stopped"),
                Err(e) => error!(consumer = %spec.name, error = %e, "event consumer gave up"),
            }
            finished.send_replace(true);
        });

        info!(consumer = %self.name, "event consumer started");

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BootableError> {
        self.stop.cancel();

        if tokio::time::timeout(self.options.shutdown_timeout, self.wait())
            .await
            .is_err()
        {
            warn!(consumer = %self.name, timeout = ?self.options.shutdown_timeout, "receive loop did not stop in time");
        }

        Ok(())
    }

    async fn wait(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
    }
}
