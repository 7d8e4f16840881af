//! Message types that flow through the relay
//!
//! A broker [`Delivery`] becomes a [`Task`] for the function, and the
//! function's reply becomes a [`TaskResult`] for the callback.

pub mod delivery;
pub mod task;

pub use delivery::Delivery;
pub use task::{Task, TaskResult};
