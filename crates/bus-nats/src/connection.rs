use crate::error::{Error, RetriesExhausted};

use std::fmt::{self, Debug, Display, Formatter};
use std::future::Future;
use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use tracing::{debug, error, info, warn};

/// Server address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "nats://localhost:4222";

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub attempts: u32,

    /// Delay between two attempts, before jitter.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(500),
        }
    }
}

/// How to reach the NATS server.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Server address.
    pub address: String,

    /// Optional user name.
    pub user: Option<String>,

    /// Optional password, only used together with `user`.
    pub password: Option<String>,

    /// Connection name reported to the server.
    pub name: Option<String>,

    /// Startup retry budget.
    pub retry: RetryPolicy,

    /// Timeout of a single connection attempt.
    pub connection_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            user: None,
            password: None,
            name: None,
            retry: RetryPolicy::default(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl Debug for ConnectionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

impl ConnectionOptions {
    /// Options for `address` with default credentials and retry budget.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new().connection_timeout(self.connection_timeout);

        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }
        if let Some(name) = &self.name {
            options = options.name(name.clone());
        }

        options
    }
}

/// Runs `operation` until it succeeds or `policy.attempts` is used up.
///
/// # Errors
///
/// Returns [`RetriesExhausted`] carrying the last error.
pub async fn with_retry<F, Fut, R, E>(
    operation_name: &str,
    policy: RetryPolicy,
    operation: F,
) -> Result<R, RetriesExhausted>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt >= attempts => {
                error!(operation = operation_name, attempts, error = %e, "operation failed after maximum retries");
                return Err(RetriesExhausted {
                    operation: operation_name.to_string(),
                    attempts,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.backoff + policy.backoff.mul_f64(fastrand::f64() * 0.1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = attempts,
                    delay = ?delay,
                    error = %e,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Connects to the server, retrying within the configured budget.
///
/// # Errors
///
/// Returns [`Error::ConnectRetriesExhausted`] once the budget is used up.
pub async fn connect_with_retry(options: &ConnectionOptions) -> Result<Client, Error> {
    let client = with_retry("connect", options.retry, || {
        options.connect_options().connect(options.address.as_str())
    })
    .await
    .map_err(Error::ConnectRetriesExhausted)?;

    info!(address = %options.address, "connected to NATS");

    Ok(client)
}
