//! Transport layer for broker subscriptions
//!
//! This module provides the subscription abstraction the queue worker runs
//! against, and its AMQP implementation.

use crate::protocol::Delivery;

pub mod amqp;

/// A live, manually-acknowledged subscription
///
/// This trait abstracts the broker client so the worker can be driven by a
/// mock in tests.
#[async_trait::async_trait]
pub trait Subscription: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait for the next delivery; `None` once the subscription has ended
    async fn next_delivery(&mut self) -> Option<Result<Delivery, Self::Error>>;

    /// Positively acknowledge a delivery
    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error>;

    /// Negatively acknowledge a delivery; without requeue the broker
    /// dead-letters it
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), Self::Error>;

    /// Check if the underlying connection is open
    fn is_connected(&self) -> bool;
}
