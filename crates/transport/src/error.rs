use dossier_bus::DataBusError;
use thiserror::Error;

/// Errors building a bus or a queue.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown transport name.
    #[error("unknown transport: {0} (expected memory, nats or jetstream)")]
    UnknownTransport(String),

    /// NATS bus failure.
    #[error(transparent)]
    Nats(#[from] dossier_bus_nats::Error),

    /// `JetStream` bus failure.
    #[error(transparent)]
    JetStream(#[from] dossier_bus_jetstream::Error),

    /// Distributed queue failure.
    #[error(transparent)]
    Queue(#[from] dossier_queue_nats::Error),
}

/// Errors of [`crate::AnyDataBus`], one variant per backend.
#[derive(Debug, Error)]
pub enum BusError {
    /// In-process bus failure.
    #[error(transparent)]
    Memory(#[from] dossier_bus_memory::Error),

    /// NATS bus failure.
    #[error(transparent)]
    Nats(#[from] dossier_bus_nats::Error),

    /// `JetStream` bus failure.
    #[error(transparent)]
    JetStream(#[from] dossier_bus_jetstream::Error),
}

impl DataBusError for BusError {}
