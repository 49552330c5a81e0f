use dossier_bus::DataBusError;
use thiserror::Error;
use uuid::Uuid;

/// Errors of the in-process bus.
#[derive(Debug, Error)]
pub enum Error {
    /// The subscriber already has an active receive loop on this bus.
    #[error("subscriber {0} is already subscribed")]
    AlreadySubscribed(Uuid),

    /// A subscription must name at least one channel.
    #[error("no channel to subscribe to")]
    NoChannels,
}

impl DataBusError for Error {}
