use crate::Error;
use crate::state::{ConsumerState, StateCell};

use std::future::Future;

use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::{AckKind, Context};
use bytes::Bytes;
use dossier_bus_nats::{RetryPolicy, with_retry};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do with a pulled message once handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Remove it from the stream.
    Ack,
    /// Return it for redelivery.
    Nak,
    /// Remove it without redelivery; it can never be handled.
    Term,
    /// Remove it and end the loop.
    AckAndStop,
}

/// A durable pull consumer on a stream, created on demand.
#[derive(Clone, Debug)]
pub struct ConsumerSpec {
    pub stream: StreamConfig,
    pub name: String,
    pub config: pull::Config,
}

impl ConsumerSpec {
    /// Ensures the stream and the consumer exist and starts pulling.
    pub async fn open(
        &self,
        context: &Context,
        policy: RetryPolicy,
    ) -> Result<pull::Stream, Error> {
        with_retry("attach consumer", policy, || {
            let context = context.clone();
            let spec = self.clone();
            async move {
                let stream = context
                    .get_or_create_stream(spec.stream)
                    .await
                    .map_err(|e| e.to_string())?;
                let consumer = stream
                    .get_or_create_consumer(&spec.name, spec.config)
                    .await
                    .map_err(|e| e.to_string())?;
                consumer.messages().await.map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(Error::ConsumerRetriesExhausted)
    }

    /// Deletes the durable consumer, logging failures.
    pub async fn delete(&self, context: &Context) {
        match context.get_stream(&self.stream.name).await {
            Ok(stream) => {
                if let Err(e) = stream.delete_consumer(&self.name).await {
                    warn!(consumer = %self.name, error = %e, "failed to delete consumer");
                }
            }
            Err(e) => warn!(stream = %self.stream.name, error = %e, "failed to look up stream"),
        }
    }
}

/// Pulls from `messages` until stopped, handing each payload to `handle` and
/// settling it according to the returned [`Outcome`].
///
/// A failing message stream moves the state back to `Connecting` and the
/// consumer is re-attached within `policy`; unacknowledged messages are then
/// redelivered by the server. Returns the number of handled messages, not
/// counting terminated ones.
pub async fn consume<F, Fut>(
    context: &Context,
    spec: &ConsumerSpec,
    policy: RetryPolicy,
    state: &StateCell,
    stop: &CancellationToken,
    mut messages: pull::Stream,
    mut handle: F,
) -> Result<usize, Error>
where
    F: FnMut(Bytes) -> Fut + Send,
    Fut: Future<Output = Outcome> + Send,
{
    let mut handled = 0;
    state.set(ConsumerState::Consuming);

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                debug!(consumer = %spec.name, "stopped");
                break;
            }
            next = messages.next() => {
                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!(consumer = %spec.name, error = %e, "message stream failed, reconnecting");
                        messages = reattach(context, spec, policy, state).await?;
                        continue;
                    }
                    None => {
                        warn!(consumer = %spec.name, "message stream ended, reconnecting");
                        messages = reattach(context, spec, policy, state).await?;
                        continue;
                    }
                };

                let outcome = handle(message.payload.clone()).await;
                if outcome != Outcome::Term {
                    handled += 1;
                }

                let settled = match outcome {
                    Outcome::Ack | Outcome::AckAndStop => message.ack().await,
                    Outcome::Nak => message.ack_with(AckKind::Nak(None)).await,
                    Outcome::Term => message.ack_with(AckKind::Term).await,
                };
                if let Err(e) = settled {
                    warn!(consumer = %spec.name, ?outcome, error = %e, "failed to settle message");
                }

                if outcome == Outcome::AckAndStop {
                    stop.cancel();
                    break;
                }
            }
        }
    }

    state.set(ConsumerState::Disconnected);
    info!(consumer = %spec.name, handled, "receive loop ended");

    Ok(handled)
}

async fn reattach(
    context: &Context,
    spec: &ConsumerSpec,
    policy: RetryPolicy,
    state: &StateCell,
) -> Result<pull::Stream, Error> {
    state.set(ConsumerState::Connecting);

    match spec.open(context, policy).await {
        Ok(messages) => {
            state.set(ConsumerState::Consuming);
            Ok(messages)
        }
        Err(e) => {
            state.set(ConsumerState::Disconnected);
            Err(e)
        }
    }
}
