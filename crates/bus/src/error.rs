use thiserror::Error;

use crate::subscriber::HandlerError;

/// Errors raised while decoding a message from its wire form.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The `TYPE` entry names no known message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A content key names no known field.
    #[error("unknown message field: {0}")]
    UnknownField(String),

    /// A channel name is not part of the channel domain.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The `TYPE` entry is absent.
    #[error("missing TYPE entry")]
    MissingType,

    /// The `DATE` entry is absent.
    #[error("missing DATE entry")]
    MissingDate,

    /// The `DATE` entry is not an RFC 3339 timestamp.
    #[error("invalid DATE entry {0}: {1}")]
    InvalidDate(String, chrono::ParseError),

    /// The payload is not a flat JSON object of strings.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Outcome of a delivery that did not complete normally.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}
