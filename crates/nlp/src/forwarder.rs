use crate::Monitorable;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dossier_bus::{
    Channel, DataBus, Field, HandlerError, Message, MessageHandler, MessageType, OnRegistered,
    Subscriber,
};
use dossier_queue_memory::MemoryQueue;
use tracing::{debug, info, warn};

const UNKNOWN_TOTAL: i64 = -1;

#[derive(Debug)]
struct Counters {
    total: AtomicI64,
    processed: AtomicI64,
}

struct Forwarding {
    queue: MemoryQueue<Message>,
    counters: Arc<Counters>,
}

#[async_trait]
impl MessageHandler for Forwarding {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message.message_type() {
            MessageType::InitMonitoring => {
                let value = message.get(Field::Value).unwrap_or_default();
                let expected: i64 = value
                    .parse()
                    .map_err(|e| format!("invalid INIT_MONITORING value {value:?}: {e}"))?;
                let _ = self.counters.total.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                    Some(if total < 0 { expected } else { total + expected })
                });
                info!(expected, "monitoring initialised");
            }
            MessageType::ExtractNlp => {
                if self.queue.try_push(message) {
                    self.counters.processed.fetch_add(1, Ordering::SeqCst);
                } else {
                    warn!(
                        capacity = ?self.queue.capacity(),
                        "local queue rejected extraction request, dropping it"
                    );
                }
            }
            MessageType::Shutdown => debug!("forwarder received shutdown"),
        }

        Ok(())
    }
}

/// Bridges the NLP channel into a local queue consumed by a worker pool.
///
/// INIT_MONITORING messages add to the expected total; EXTRACT_NLP messages
/// are offered to the local queue without waiting, and dropped when it is
/// full since the upstream transport is responsible for redelivery.
#[derive(Clone, Debug)]
pub struct NlpForwarder<B>
where
    B: DataBus,
{
    bus: B,
    queue: MemoryQueue<Message>,
    counters: Arc<Counters>,
    subscriber: Subscriber,
}

impl<B> NlpForwarder<B>
where
    B: DataBus,
{
    /// Creates a forwarder feeding `queue` from `bus`.
    pub fn new(bus: B, queue: MemoryQueue<Message>) -> Self {
        let counters = Arc::new(Counters {
            total: AtomicI64::new(UNKNOWN_TOTAL),
            processed: AtomicI64::new(0),
        });
        let subscriber = Subscriber::new(Forwarding {
            queue: queue.clone(),
            counters: counters.clone(),
        });

        Self {
            bus,
            queue,
            counters,
            subscriber,
        }
    }

    /// The local queue.
    pub const fn queue(&self) -> &MemoryQueue<Message> {
        &self.queue
    }

    /// Number of extraction requests accepted by the local queue.
    pub fn processed(&self) -> i64 {
        self.counters.processed.load(Ordering::SeqCst)
    }

    /// Expected total, `-1` until the first INIT_MONITORING.
    pub fn total(&self) -> i64 {
        self.counters.total.load(Ordering::SeqCst)
    }

    /// Subscribes to the NLP channel and forwards until a SHUTDOWN arrives or
    /// [`NlpForwarder::stop`] is called. Returns the number of messages received.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the subscription fails.
    pub async fn run(&self) -> Result<usize, B::Error> {
        self.bus
            .subscribe(self.subscriber.clone(), &[Channel::Nlp])
            .await
    }

    /// Like [`NlpForwarder::run`], running `on_registered` once subscribed.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the subscription fails.
    pub async fn run_with_callback(&self, on_registered: OnRegistered) -> Result<usize, B::Error> {
        self.bus
            .subscribe_with_callback(self.subscriber.clone(), on_registered, &[Channel::Nlp])
            .await
    }

    /// Ends the subscription started by `run`.
    ///
    /// # Errors
    ///
    /// Returns the bus error if unsubscribing fails.
    pub async fn stop(&self) -> Result<(), B::Error> {
        self.bus.unsubscribe(&self.subscriber).await
    }
}

impl<B> Monitorable for NlpForwarder<B>
where
    B: DataBus,
{
    /// `(processed - waiting) / total`, deliberately not clamped to `[0, 1]`.
    /// `-1` while no (non zero) total has been announced.
    #[allow(clippy::cast_precision_loss)]
    fn progress_rate(&self) -> f64 {
        let total = self.total();
        if total <= 0 {
            return -1.0;
        }

        let waiting = i64::try_from(self.queue.len()).unwrap_or(i64::MAX);

        (self.processed() - waiting) as f64 / total as f64
    }
}
