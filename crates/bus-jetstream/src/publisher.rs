use crate::Error;
use crate::event::{Event, EventQueue};
use crate::naming::Naming;

use std::marker::PhantomData;
use std::sync::Arc;

use async_nats::jetstream::Context;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use bytes::Bytes;
use dashmap::DashSet;
use tracing::debug;

/// Serializes events to JSON and publishes them to the durable queue of their purpose.
#[derive(Debug)]
pub struct EventPublisher<E>
where
    E: Event,
{
    context: Context,
    naming: Naming,
    ensured: Arc<DashSet<EventQueue>>,
    _marker: PhantomData<E>,
}

impl<E> Clone for EventPublisher<E>
where
    E: Event,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            naming: self.naming.clone(),
            ensured: self.ensured.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> EventPublisher<E>
where
    E: Event,
{
    pub(crate) fn new(context: Context, naming: Naming) -> Self {
        Self {
            context,
            naming,
            ensured: Arc::new(DashSet::new()),
            _marker: PhantomData,
        }
    }

    /// Publishes `event` on `queue` and waits for the server acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails if the event cannot be serialized, the stream cannot be created
    /// or the server does not acknowledge the message.
    pub async fn publish(&self, queue: EventQueue, event: &E) -> Result<(), Error> {
        self.ensure_stream(queue).await?;

        let payload = Bytes::from(serde_json::to_vec(event)?);
        let subject = self.naming.event_subject(queue);

        let ack = self
            .context
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| Error::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;
        ack.await.map_err(|e| Error::Publish {
            subject: subject.clone(),
            reason: e.to_string(),
        })?;

        debug!(queue = %queue, subject = %subject, "event published");

        Ok(())
    }

    async fn ensure_stream(&self, queue: EventQueue) -> Result<(), Error> {
        if self.ensured.contains(&queue) {
            return Ok(());
        }

        self.context
            .get_or_create_stream(event_stream_config(&self.naming, queue))
            .await
            .map_err(|e| Error::Stream {
                stream: self.naming.event_stream(queue),
                reason: e.to_string(),
            })?;
        self.ensured.insert(queue);

        Ok(())
    }
}

/// Work-queue stream holding the events of one purpose.
pub(crate) fn event_stream_config(naming: &Naming, queue: EventQueue) -> StreamConfig {
    StreamConfig {
        name: naming.event_stream(queue),
        subjects: vec![naming.event_subject(queue)],
        retention: RetentionPolicy::WorkQueue,
        storage: StorageType::File,
        ..Default::default()
    }
}
