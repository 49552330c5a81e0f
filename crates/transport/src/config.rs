use crate::Error;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub use dossier_bus_nats::connection::DEFAULT_ADDRESS;

use dossier_bus_nats::{ConnectionOptions, RetryPolicy};
use dossier_pipeline::{DEFAULT_QUEUE_NAME, PipelineNamer, Stages};
use serde::{Deserialize, Serialize};

/// Prefix of broker stream and subject names when none is configured.
pub const DEFAULT_STREAM_PREFIX: &str = "dossier";

/// Which backend carries the bus and the stage queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Transport {
    /// Everything in process. Single-process deployments only.
    #[default]
    Memory,

    /// NATS core subjects for the bus, durable streams for the queues.
    Nats,

    /// `JetStream` for both the bus and the queues.
    Jetstream,
}

impl Transport {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Nats => "nats",
            Self::Jetstream => "jetstream",
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "nats" => Ok(Self::Nats),
            "jetstream" => Ok(Self::Jetstream),
            _ => Err(Error::UnknownTransport(s.to_string())),
        }
    }
}

impl TryFrom<String> for Transport {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Transport selection and connection settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Backend.
    pub transport: Transport,

    /// Server address, ignored by the memory transport.
    pub address: String,

    /// Optional user name.
    pub user: Option<String>,

    /// Optional password.
    pub password: Option<String>,

    /// Connection attempts before giving up.
    pub connect_attempts: u32,

    /// Delay between connection attempts.
    #[serde(with = "millis")]
    pub connect_backoff: Duration,

    /// Prefix of stream, subject and queue names on the broker.
    pub stream_prefix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();

        Self {
            transport: Transport::default(),
            address: DEFAULT_ADDRESS.to_string(),
            user: None,
            password: None,
            connect_attempts: retry.attempts,
            connect_backoff: retry.backoff,
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("transport", &self.transport)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_backoff", &self.connect_backoff)
            .field("stream_prefix", &self.stream_prefix)
            .finish()
    }
}

impl TransportConfig {
    /// Connection options for a NATS backed component named `name`.
    #[must_use]
    pub fn connection_options(&self, name: &str) -> ConnectionOptions {
        ConnectionOptions {
            user: self.user.clone(),
            password: self.password.clone(),
            name: Some(name.to_string()),
            retry: RetryPolicy {
                attempts: self.connect_attempts,
                backoff: self.connect_backoff,
            },
            ..ConnectionOptions::new(self.address.clone())
        }
    }
}

/// Which stages this deployment runs and how their queues are named.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Configured stages, empty for the single-process default.
    pub stages: Stages,

    /// Base of every queue name.
    pub queue_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Stages::default(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Queue namer for this configuration.
    #[must_use]
    pub fn namer(&self) -> PipelineNamer {
        PipelineNamer::from_stages(&self.stages, self.queue_name.clone())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
