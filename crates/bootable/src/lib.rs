//! Lifecycle contract for long-running pipeline services (consumers, worker pools).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use async_trait::async_trait;

/// Boxed error returned by lifecycle operations.
pub type BootableError = Box<dyn std::error::Error + Send + Sync>;

/// A service that is started once, runs in the background and is stopped cooperatively.
#[async_trait]
pub trait Bootable
where
    Self: Send + Sync + 'static,
{
    /// Name used in logs.
    fn bootable_name(&self) -> &str;

    /// Starts the background work. Returns once the service is running.
    async fn start(&self) -> Result<(), BootableError>;

    /// Signals termination and waits (bounded) for the background work to exit.
    async fn shutdown(&self) -> Result<(), BootableError>;

    /// Waits until the background work has exited on its own or after `shutdown`.
    async fn wait(&self);
}
