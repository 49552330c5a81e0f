use crate::BusError;

use async_trait::async_trait;
use dossier_bus::{Channel, DataBus, Message, OnRegistered, Subscriber};
use dossier_bus_jetstream::JetStreamDataBus;
use dossier_bus_memory::MemoryDataBus;
use dossier_bus_nats::NatsDataBus;

/// A bus of any backend, chosen at runtime.
#[derive(Clone, Debug)]
pub enum AnyDataBus {
    /// In-process bus.
    Memory(MemoryDataBus),

    /// NATS core subjects.
    Nats(NatsDataBus),

    /// `JetStream` streams with acknowledgement.
    JetStream(JetStreamDataBus),
}

impl From<MemoryDataBus> for AnyDataBus {
    fn from(bus: MemoryDataBus) -> Self {
        Self::Memory(bus)
    }
}

impl From<NatsDataBus> for AnyDataBus {
    fn from(bus: NatsDataBus) -> Self {
        Self::Nats(bus)
    }
}

impl From<JetStreamDataBus> for AnyDataBus {
    fn from(bus: JetStreamDataBus) -> Self {
        Self::JetStream(bus)
    }
}

#[async_trait]
impl DataBus for AnyDataBus {
    type Error = BusError;

    async fn subscribe_with_callback(
        &self,
        subscriber: Subscriber,
        on_registered: OnRegistered,
        channels: &[Channel],
    ) -> Result<usize, Self::Error> {
        match self {
            Self::Memory(bus) => Ok(bus
                .subscribe_with_callback(subscriber, on_registered, channels)
                .await?),
            Self::Nats(bus) => Ok(bus
                .subscribe_with_callback(subscriber, on_registered, channels)
                .await?),
            Self::JetStream(bus) => Ok(bus
                .subscribe_with_callback(subscriber, on_registered, channels)
                .await?),
        }
    }

    async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<(), Self::Error> {
        match self {
            Self::Memory(bus) => Ok(bus.unsubscribe(subscriber).await?),
            Self::Nats(bus) => Ok(bus.unsubscribe(subscriber).await?),
            Self::JetStream(bus) => Ok(bus.unsubscribe(subscriber).await?),
        }
    }

    async fn publish(&self, channel: Channel, message: Message) -> Result<(), Self::Error> {
        match self {
            Self::Memory(bus) => Ok(bus.publish(channel, message).await?),
            Self::Nats(bus) => Ok(bus.publish(channel, message).await?),
            Self::JetStream(bus) => Ok(bus.publish(channel, message).await?),
        }
    }
}
