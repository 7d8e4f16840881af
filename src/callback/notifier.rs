//! Delivery of function results to the caller's callback address
//!
//! The notifier never fails the pipeline. It reports a [`CallbackOutcome`] and
//! leaves settlement decisions to the worker. Critical results get the
//! configured retry budget; everything else gets a single attempt.

use crate::observability::metrics::metrics;
use crate::protocol::TaskResult;
use crate::retry::RetryPolicy;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Result of a callback attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// No callback address was available
    Skipped,
}

impl CallbackOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, CallbackOutcome::Delivered { .. })
    }
}

/// Posts task results to their owner
pub struct CallbackNotifier {
    client: reqwest::Client,
    timeout: Option<Duration>,
    critical_retry: RetryPolicy,
}

impl CallbackNotifier {
    /// `critical_retry` applies to critical results only
    pub fn new(timeout: Option<Duration>, critical_retry: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), timeout, critical_retry)
    }

    pub fn with_client(
        client: reqwest::Client,
        timeout: Option<Duration>,
        critical_retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            timeout,
            critical_retry,
        }
    }

    /// Send `result` to its owner, falling back to `fallback_owner` when the
    /// function's reply blanked the owner field
    #[tracing::instrument(
        name = "callback",
        skip(self, result, fallback_owner),
        fields(correlation_id = %result.correlation_id)
    )]
    pub async fn notify(
        &self,
        result: &TaskResult,
        fallback_owner: &str,
        critical: bool,
    ) -> CallbackOutcome {
        let Some(address) = resolve_callback_address(result, fallback_owner) else {
            if critical {
                error!("Critical message has no callback address");
                metrics().callback_failed(true);
            } else {
                warn!("No callback address for task result, skipping callback");
                metrics().callback_skipped();
            }
            return CallbackOutcome::Skipped;
        };

        let policy = if critical {
            self.critical_retry
        } else {
            RetryPolicy::none()
        };

        debug!(owner = %address, "Callback send");

        let mut attempt = 0;
        let outcome = loop {
            match self.post_once(address, result).await {
                Ok(()) => {
                    break CallbackOutcome::Delivered {
                        attempts: attempt + 1,
                    }
                }
                Err(reason) if attempt < policy.max_retries => {
                    let delay = policy.backoff_delay(attempt);
                    warn!(
                        owner = %address,
                        attempt = attempt + 1,
                        reason = %reason,
                        "Critical callback failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(reason) => {
                    break CallbackOutcome::Failed {
                        attempts: attempt + 1,
                        reason,
                    }
                }
            }
        };

        match &outcome {
            CallbackOutcome::Delivered { attempts } => {
                debug!(owner = %address, attempts, "Callback delivered");
                metrics().callback_delivered();
            }
            CallbackOutcome::Failed { attempts, reason } if critical => {
                error!(
                    owner = %address,
                    attempts,
                    reason = %reason,
                    "Critical message did not make it to the callback"
                );
                metrics().callback_failed(true);
            }
            CallbackOutcome::Failed { reason, .. } => {
                debug!(owner = %address, reason = %reason, "Callback failed, ignoring");
                metrics().callback_failed(false);
            }
            CallbackOutcome::Skipped => {}
        }

        outcome
    }

    async fn post_once(&self, address: &str, result: &TaskResult) -> Result<(), String> {
        let mut request = self.client.post(address).json(result);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("callback returned status {}", response.status())),
            Err(e) => Err(format!("callback request failed: {e}")),
        }
    }
}

/// Address the result is posted to
///
/// The function's reply owns the address. When the reply dropped the owner
/// field, the original reply-to of the delivery is used instead.
pub fn resolve_callback_address<'a>(
    result: &'a TaskResult,
    fallback_owner: &'a str,
) -> Option<&'a str> {
    if !result.owner.is_empty() {
        Some(result.owner.as_str())
    } else if !fallback_owner.is_empty() {
        warn!(
            fallback = %fallback_owner,
            "Function reply has no owner, using the delivery's reply-to"
        );
        Some(fallback_owner)
    } else {
        None
    }
}
