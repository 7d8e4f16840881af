//! Observability for the relay
//!
//! Structured logging, metrics collection and the health check endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{amqp_span, delivery_span};
