use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Anything that travels on an event queue as JSON.
pub trait Event
where
    Self: Serialize + DeserializeOwned + Send + Sync + 'static,
{
}

impl<T> Event for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Purpose of a durable event queue. Each purpose has its own stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventQueue {
    /// Application events.
    Event,
    /// Task workflow events.
    Task,
    /// Events addressed to the task manager.
    ManagerEvent,
}

impl EventQueue {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Task => "TASK",
            Self::ManagerEvent => "MANAGER_EVENT",
        }
    }
}

impl Display for EventQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow events exchanged between task workers and the task manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskEvent {
    /// A task was created.
    #[serde(rename_all = "camelCase")]
    Created {
        /// Task id.
        task_id: String,
        /// Task name.
        name: String,
        /// Creation date.
        created_at: DateTime<Utc>,
    },

    /// A task made progress.
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Task id.
        task_id: String,
        /// Progress fraction.
        progress: f64,
    },

    /// A task finished with a result.
    #[serde(rename_all = "camelCase")]
    Result {
        /// Task id.
        task_id: String,
        /// Result payload.
        result: serde_json::Value,
    },

    /// A task failed.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Task id.
        task_id: String,
        /// Failure description.
        error: String,
    },

    /// A task was cancelled.
    #[serde(rename_all = "camelCase")]
    Cancelled {
        /// Task id.
        task_id: String,
        /// Whether the task should be queued again.
        requeue: bool,
    },
}

impl TaskEvent {
    /// Id of the task the event is about.
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::Created { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Result { task_id, .. }
            | Self::Error { task_id, .. }
            | Self::Cancelled { task_id, .. } => task_id,
        }
    }
}
