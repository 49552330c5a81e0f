//! Runtime selection of the bus and queue backends.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bus;
mod config;
mod error;
mod factory;
mod queue;

pub use bus::AnyDataBus;
pub use config::{DEFAULT_ADDRESS, DEFAULT_STREAM_PREFIX, PipelineConfig, Transport, TransportConfig};
pub use error::{BusError, Error};
pub use factory::TransportFactory;
pub use queue::AnyQueue;
