//! NLP stage: progress forwarding from the bus and the extraction worker pool.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod app;
mod error;
mod forwarder;
mod request;

pub use app::{DEFAULT_QUEUE_SIZE, NlpApp, NlpAppOptions};
pub use error::Error;
pub use forwarder::NlpForwarder;
pub use request::{ExtractRequest, NlpProcessor, ProcessorError};

/// Exposes a fractional progress indicator for a long-running operation.
pub trait Monitorable {
    /// Progress as a fraction of the expected work, or `-1.0` when unknown.
    fn progress_rate(&self) -> f64;
}
