use crate::{AnyDataBus, AnyQueue, Error, Transport, TransportConfig};

use dossier_bus::Message;
use dossier_bus_jetstream::{JetStreamDataBus, JetStreamDataBusOptions};
use dossier_bus_memory::MemoryDataBus;
use dossier_bus_nats::{NatsDataBus, NatsDataBusOptions, RetryPolicy};
use dossier_queue_memory::MemoryQueues;
use dossier_queue_nats::NatsQueue;
use tracing::info;

/// Builds buses and stage queues for the configured transport.
///
/// With the memory transport every bus handed out is the same in-process bus
/// and queues with the same name share their entries, so components wired in
/// one process see each other.
#[derive(Clone, Debug)]
pub struct TransportFactory {
    config: TransportConfig,
    name: String,
    memory_bus: MemoryDataBus,
    memory_queues: MemoryQueues<Message>,
}

impl TransportFactory {
    /// A factory whose connections report themselves as `name`.
    #[must_use]
    pub fn new(config: TransportConfig, name: impl Into<String>) -> Self {
        Self {
            config,
            name: name.into(),
            memory_bus: MemoryDataBus::new(),
            memory_queues: MemoryQueues::unbounded(),
        }
    }

    /// The configuration this factory builds from.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connects a bus.
    ///
    /// # Errors
    ///
    /// Fails if the server cannot be reached within the retry budget.
    pub async fn bus(&self) -> Result<AnyDataBus, Error> {
        let connection = self.config.connection_options(&self.name);

        let bus = match self.config.transport {
            Transport::Memory => AnyDataBus::Memory(self.memory_bus.clone()),
            Transport::Nats => AnyDataBus::Nats(
                NatsDataBus::connect(NatsDataBusOptions {
                    connection,
                    subject_prefix: format!("{}.", self.config.stream_prefix),
                })
                .await?,
            ),
            Transport::Jetstream => AnyDataBus::JetStream(
                JetStreamDataBus::connect(JetStreamDataBusOptions {
                    connection,
                    prefix: self.config.stream_prefix.clone(),
                    retry: RetryPolicy {
                        attempts: self.config.connect_attempts,
                        backoff: self.config.connect_backoff,
                    },
                })
                .await?,
            ),
        };
        info!(transport = %self.config.transport, "bus ready");

        Ok(bus)
    }

    /// Opens the queue `name`. Both NATS transports use a durable work queue.
    ///
    /// # Errors
    ///
    /// Fails if the server cannot be reached or the queue cannot be created.
    pub async fn queue(&self, name: &str) -> Result<AnyQueue<Message>, Error> {
        let queue = match self.config.transport {
            Transport::Memory => AnyQueue::Memory(self.memory_queues.open(name)),
            Transport::Nats | Transport::Jetstream => AnyQueue::Nats(
                NatsQueue::connect(
                    &self.config.connection_options(&self.name),
                    &self.config.stream_prefix,
                    name,
                )
                .await?,
            ),
        };
        info!(transport = %self.config.transport, queue = %name, "queue ready");

        Ok(queue)
    }
}
