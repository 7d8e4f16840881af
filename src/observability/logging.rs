//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for the
//! delivery pipeline and broker operations.
//!
//! ## Log Format Options
//!
//! The logging system supports three output formats controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - when unset, the relay's
//!   `DEBUG` option selects DEBUG or INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Production JSON logging
//! LOG_FORMAT=json DEBUG=false ./function-relay run
//!
//! # Development with colors
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ./function-relay run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json, // Default to JSON for production
        }
    }
}

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let mut filter = EnvFilter::new(level.to_string());
    // Reduce noise from dependencies
    for directive in [
        "lapin=warn",
        "amq_protocol=warn",
        "hyper=warn",
        "reqwest=warn",
        "warp=warn",
        "tokio=warn",
    ] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let span_events = if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    // try_init: a second initialization (tests, embedding) keeps the first subscriber
    let _ = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
}

/// Pick the log level from `LOG_LEVEL`, falling back to the relay's debug toggle
pub fn resolve_level(log_level: Option<&str>, debug: bool) -> Level {
    match log_level.map(|l| l.trim().to_uppercase()) {
        Some(l) if l == "ERROR" => Level::ERROR,
        Some(l) if l == "WARN" => Level::WARN,
        Some(l) if l == "INFO" => Level::INFO,
        Some(l) if l == "DEBUG" => Level::DEBUG,
        Some(l) if l == "TRACE" => Level::TRACE,
        _ if debug => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging(debug: bool) {
    let level = resolve_level(env::var("LOG_LEVEL").ok().as_deref(), debug);

    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let log_format = LogFormat::parse(&format);

    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(level, log_format, include_spans);
}

/// Create a delivery processing span with contextual information
#[macro_export]
macro_rules! delivery_span {
    ($($field:tt)*) => {
        tracing::info_span!("delivery_processing", $($field)*)
    };
}

/// Create an AMQP operation span
#[macro_export]
macro_rules! amqp_span {
    ($($field:tt)*) => {
        tracing::info_span!("amqp_operation", $($field)*)
    };
}

// Re-export macros for convenience
pub use {amqp_span, delivery_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
        assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
        assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
        assert!(matches!(LogFormat::parse("  pretty\n"), LogFormat::Pretty));
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        // Invalid formats should default to JSON for production safety
        assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
        assert!(matches!(LogFormat::parse(""), LogFormat::Json));
        assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
    }

    #[test]
    fn test_explicit_level_wins_over_debug_toggle() {
        assert_eq!(resolve_level(Some("WARN"), true), Level::WARN);
        assert_eq!(resolve_level(Some("error"), false), Level::ERROR);
        assert_eq!(resolve_level(Some(" trace "), false), Level::TRACE);
    }

    #[test]
    fn test_debug_toggle_selects_level() {
        assert_eq!(resolve_level(None, true), Level::DEBUG);
        assert_eq!(resolve_level(None, false), Level::INFO);
        assert_eq!(resolve_level(Some("verbose"), true), Level::DEBUG);
        assert_eq!(resolve_level(Some("verbose"), false), Level::INFO);
    }

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        init_logging(Level::INFO, LogFormat::Compact, false);
        init_logging(Level::DEBUG, LogFormat::Json, true);
    }
}
