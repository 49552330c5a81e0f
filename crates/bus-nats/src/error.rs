use dossier_bus::DataBusError;
use thiserror::Error;
use uuid::Uuid;

/// A retried operation used up its attempts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetriesExhausted {
    /// The operation that was retried.
    pub operation: String,

    /// Number of attempts made.
    pub attempts: u32,

    /// The error of the last attempt.
    pub last_error: String,
}

/// Errors of the NATS bus.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not reach the server within the retry budget.
    #[error(transparent)]
    ConnectRetriesExhausted(RetriesExhausted),

    /// Subscribing to a channel subject failed.
    #[error("failed to subscribe to {subject}: {reason}")]
    Subscribe {
        /// The subject.
        subject: String,

        /// Underlying client error.
        reason: String,
    },

    /// Flushing the subscription requests failed.
    #[error("failed to flush subscriptions: {0}")]
    Flush(String),

    /// Publishing failed.
    #[error("failed to publish on {subject}: {reason}")]
    Publish {
        /// The subject.
        subject: String,

        /// Underlying client error.
        reason: String,
    },

    /// The subscriber already has an active receive loop on this bus.
    #[error("subscriber {0} is already subscribed")]
    AlreadySubscribed(Uuid),

    /// A subscription must name at least one channel.
    #[error("no channel to subscribe to")]
    NoChannels,
}

impl DataBusError for Error {}
