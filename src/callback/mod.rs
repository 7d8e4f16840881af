//! Callback delivery of function results

pub mod notifier;

pub use notifier::{resolve_callback_address, CallbackNotifier, CallbackOutcome};
