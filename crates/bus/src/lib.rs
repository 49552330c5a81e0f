//! Abstract interface for the document pipeline message bus.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[macro_use]
mod macros;

/// Logical topics used to filter subscriptions.
pub mod channel;

/// Injectable time sources.
pub mod clock;

mod error;

/// Typed message envelope and its wire form.
pub mod message;

/// Panic isolation for handler and worker futures.
pub mod panic_guard;

/// Subscriber identity and message handlers.
pub mod subscriber;

pub use channel::Channel;
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{DeliveryError, ParseError};
pub use message::{Field, Message, MessageType, ShutdownMessage};
pub use subscriber::{HandlerError, MessageHandler, Subscriber};

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::debug;

/// Marker trait for bus errors.
pub trait DataBusError: std::error::Error + Send + Sync + 'static {}

/// Callback run once a registration is observable by publishers.
pub type OnRegistered = Box<dyn FnOnce() + Send>;

/// Publish/subscribe contract shared by every bus backend.
///
/// `subscribe` runs the receive loop for the subscriber and only resolves once
/// that loop has terminated, either because a SHUTDOWN message was observed on
/// one of the subscribed channels or because `unsubscribe` was called. It
/// returns the number of messages handed to the subscriber, the terminating
/// SHUTDOWN included.
#[async_trait]
pub trait DataBus
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the bus.
    type Error: DataBusError;

    /// Subscribes to the given channels and blocks until the receive loop ends.
    async fn subscribe(
        &self,
        subscriber: Subscriber,
        channels: &[Channel],
    ) -> Result<usize, Self::Error> {
        let id = subscriber.id();
        let description = format!("{channels:?}");
        self.subscribe_with_callback(
            subscriber,
            Box::new(move || debug!(subscriber = %id, channels = %description, "subscribed")),
            channels,
        )
        .await
    }

    /// Like `subscribe`, additionally running `on_registered` once the
    /// registration is active, so a publisher can safely start sending.
    async fn subscribe_with_callback(
        &self,
        subscriber: Subscriber,
        on_registered: OnRegistered,
        channels: &[Channel],
    ) -> Result<usize, Self::Error>;

    /// Removes every registration of `subscriber` and ends its receive loop.
    /// Unknown subscribers are ignored.
    async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<(), Self::Error>;

    /// Delivers `message` to every current subscriber of `channel`.
    async fn publish(&self, channel: Channel, message: Message) -> Result<(), Self::Error>;
}
