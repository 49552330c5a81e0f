use dossier_bus::Field;
use thiserror::Error;

/// Errors of the NLP stage.
#[derive(Debug, Error)]
pub enum Error {
    /// `start` was called on a pool that already ran.
    #[error("{0} already started")]
    AlreadyStarted(String),

    /// An EXTRACT_NLP message lacks a required field.
    #[error("extraction request is missing {0}")]
    MissingField(Field),

    /// The message is not an extraction request.
    #[error("not an extraction request: {0}")]
    NotAnExtraction(String),

    /// The forwarder could not subscribe to the bus.
    #[error("subscription failed: {0}")]
    Subscribe(String),
}
