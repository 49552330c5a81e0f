//! Pipeline stages and the names of the queues that connect them.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod namer;
mod stage;

pub use error::Error;
pub use namer::{DEFAULT_QUEUE_NAME, DEFAULT_TARGET, PipelineNamer};
pub use stage::{Stage, Stages};
