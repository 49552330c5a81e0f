use crate::event::EventQueue;

use dossier_bus::Channel;

/// Stream, subject and consumer names under a common prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Naming {
    prefix: String,
}

impl Naming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Stream names cannot contain `.`, `*`, `>` or whitespace.
    pub fn channel_stream(&self, channel: Channel) -> String {
        format!("{}_BUS_{}", self.stream_prefix(), channel)
    }

    pub fn channel_subject(&self, channel: Channel) -> String {
        format!("{}.bus.{}", self.prefix, channel)
    }

    pub fn event_stream(&self, queue: EventQueue) -> String {
        format!("{}_EVENTS_{}", self.stream_prefix(), queue)
    }

    pub fn event_subject(&self, queue: EventQueue) -> String {
        format!("{}.events.{}", self.prefix, queue)
    }

    pub fn event_consumer(&self, queue: EventQueue) -> String {
        format!("{}_{}_consumer", self.stream_prefix(), queue)
    }

    fn stream_prefix(&self) -> String {
        self.prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}
