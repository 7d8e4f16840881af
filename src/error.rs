//! Error types for the function relay
//!
//! Errors that stop the relay (fatal dispatch, broker, subscription,
//! configuration) are folded into [`RelayError`], which is what the queue
//! worker and the binary deal with. Routing and per-delivery dispatch errors
//! are settled by the worker and never surface here on their own.

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::transport::amqp::AmqpError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// A dispatch failure in fail-fast mode; terminates the worker before the
    /// delivery is acknowledged.
    #[error("Dispatch to {destination} failed, aborting relay: {source}")]
    DispatchFatal {
        destination: String,
        #[source]
        source: DispatchError,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] AmqpError),

    #[error("Subscription error: {0}")]
    Subscription(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl RelayError {
    /// Wrap an arbitrary subscription error
    pub fn subscription<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Subscription(Box::new(error))
    }

    /// Create a fatal dispatch error
    pub fn dispatch_fatal<S: Into<String>>(destination: S, source: DispatchError) -> Self {
        Self::DispatchFatal {
            destination: destination.into(),
            source,
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Error text that is safe to put in logs
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static URI_CREDENTIALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(amqps?://[^:/@\s]+):[^@\s]+@").expect("credential pattern is valid")
});

static SECRET_PAIRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

/// Strip broker credentials and secrets from an error message before logging
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = URI_CREDENTIALS
        .replace_all(message, "${1}:***@")
        .to_string();
    sanitized = SECRET_PAIRS.replace_all(&sanitized, "${1}=***").to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
