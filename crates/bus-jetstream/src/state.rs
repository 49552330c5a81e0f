use std::fmt::{self, Display, Formatter};

use tokio::sync::watch;

/// Lifecycle of a `JetStream` receive loop.
///
/// `Disconnected -> Connecting -> Consuming`, back to `Connecting` on a
/// connection error, and `Disconnected` for good once stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not attached. Initial and terminal state.
    #[default]
    Disconnected,

    /// Attaching (or re-attaching) the durable consumer.
    Connecting,

    /// Pulling messages.
    Consuming,
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Consuming => "CONSUMING",
        })
    }
}

/// Shared, observable consumer state.
#[derive(Clone, Debug)]
pub(crate) struct StateCell(watch::Sender<ConsumerState>);

impl StateCell {
    pub fn new() -> Self {
        Self(watch::Sender::new(ConsumerState::Disconnected))
    }

    pub fn get(&self) -> ConsumerState {
        *self.0.borrow()
    }

    pub fn set(&self, state: ConsumerState) {
        self.0.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.0.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
