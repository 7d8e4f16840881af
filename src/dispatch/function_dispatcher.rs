//! HTTP invocation of functions
//!
//! The dispatcher posts a [`Task`] to the function's URL and decodes the reply
//! into a [`TaskResult`]. The reply body decides the outcome: a readable
//! reply is forwarded whatever the status code. Transport errors and 5xx
//! replies without a readable body are retried with exponential backoff up to
//! the configured budget; other failures are returned immediately.

use crate::protocol::{Task, TaskResult};
use crate::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Function invocation failures
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request to {destination} failed: {message}")]
    Transport {
        destination: String,
        message: String,
    },

    #[error("request to {destination} timed out after {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    #[error("function at {destination} returned status {status}")]
    Status { destination: String, status: u16 },

    #[error("reply from {destination} could not be decoded: {message}")]
    Decode {
        destination: String,
        message: String,
    },
}

impl DispatchError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Transport { .. } | DispatchError::Timeout { .. } => true,
            DispatchError::Status { status, .. } => *status >= 500,
            DispatchError::Decode { .. } => false,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            DispatchError::Transport { destination, .. }
            | DispatchError::Timeout { destination, .. }
            | DispatchError::Status { destination, .. }
            | DispatchError::Decode { destination, .. } => destination,
        }
    }
}

/// Posts tasks to functions and waits for their reply
pub struct FunctionDispatcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl FunctionDispatcher {
    pub fn new(timeout: Option<Duration>, retry: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), timeout, retry)
    }

    /// Use a preconfigured client (custom resolvers, proxies)
    pub fn with_client(client: reqwest::Client, timeout: Option<Duration>, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    /// Invoke the function named by `task.destination`
    #[tracing::instrument(
        name = "dispatch",
        skip(self, task),
        fields(destination = %task.destination, correlation_id = %task.correlation_id)
    )]
    pub async fn dispatch(&self, task: &Task) -> Result<TaskResult, DispatchError> {
        let mut attempt = 0;

        loop {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts(),
                "Sending task to function"
            );

            match self.send_once(task).await {
                Ok(result) => {
                    info!(critical = result.critical, "Function replied");
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        "Function call failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, task: &Task) -> Result<TaskResult, DispatchError> {
        let destination = task.destination.as_str();

        let mut request = self.client.post(destination).json(task);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.request_error(destination, e))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Task status");

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(destination, e))?;

        if status.is_success() {
            return decode_reply(destination, &body);
        }

        match decode_reply(destination, &body) {
            Ok(result) => {
                warn!(
                    status = status.as_u16(),
                    "Function replied with an error status, forwarding its reply"
                );
                Ok(result)
            }
            Err(_) => Err(DispatchError::Status {
                destination: destination.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn request_error(&self, destination: &str, error: reqwest::Error) -> DispatchError {
        match self.timeout {
            Some(timeout) if error.is_timeout() => DispatchError::Timeout {
                destination: destination.to_string(),
                timeout,
            },
            _ => DispatchError::Transport {
                destination: destination.to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// Decode a function reply body; omitted fields take their zero value
pub fn decode_reply(destination: &str, body: &str) -> Result<TaskResult, DispatchError> {
    serde_json::from_str(body).map_err(|e| DispatchError::Decode {
        destination: destination.to_string(),
        message: e.to_string(),
    })
}
