use dossier_bus::DataBusError;
use dossier_bus_nats::RetriesExhausted;
use thiserror::Error;
use uuid::Uuid;

/// Errors of the `JetStream` backends.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not reach the server within the startup retry budget.
    #[error(transparent)]
    ConnectRetriesExhausted(RetriesExhausted),

    /// Could not (re)attach a consumer within the retry budget.
    #[error(transparent)]
    ConsumerRetriesExhausted(RetriesExhausted),

    /// Creating or looking up a stream failed.
    #[error("stream {stream} unavailable: {reason}")]
    Stream {
        /// The stream name.
        stream: String,

        /// Underlying client error.
        reason: String,
    },

    /// The server did not acknowledge a published message.
    #[error("failed to publish on {subject}: {reason}")]
    Publish {
        /// The subject.
        subject: String,

        /// Underlying client error.
        reason: String,
    },

    /// An event could not be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// The subscriber already has an active receive loop on this bus.
    #[error("subscriber {0} is already subscribed")]
    AlreadySubscribed(Uuid),

    /// A subscription must name at least one channel.
    #[error("no channel to subscribe to")]
    NoChannels,

    /// `start` was called on a consumer that already ran.
    #[error("consumer {0} already started")]
    AlreadyStarted(String),

    /// Other NATS client failure.
    #[error("nats error: {0}")]
    Nats(String),
}

impl From<dossier_bus_nats::Error> for Error {
    fn from(error: dossier_bus_nats::Error) -> Self {
        match error {
            dossier_bus_nats::Error::ConnectRetriesExhausted(exhausted) => {
                Self::ConnectRetriesExhausted(exhausted)
            }
            other => Self::Nats(other.to_string()),
        }
    }
}

impl DataBusError for Error {}
