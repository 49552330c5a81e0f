use dossier_bus_nats::RetriesExhausted;
use thiserror::Error;

/// Errors raised while opening a NATS queue.
///
/// Queue operations themselves never fail; see [`dossier_queue::BlockingQueue`].
#[derive(Debug, Error)]
pub enum Error {
    /// The server could not be reached within the retry budget.
    #[error(transparent)]
    ConnectRetriesExhausted(RetriesExhausted),

    /// The backing stream could not be created.
    #[error("failed to create stream {stream}: {reason}")]
    Stream {
        /// Stream name.
        stream: String,
        /// Underlying cause.
        reason: String,
    },

    /// The shared consumer could not be created.
    #[error("failed to create consumer {consumer}: {reason}")]
    Consumer {
        /// Consumer name.
        consumer: String,
        /// Underlying cause.
        reason: String,
    },

    /// Any other client failure.
    #[error("nats: {0}")]
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
