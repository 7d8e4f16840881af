//! Function Relay
//!
//! Bridges an AMQP topic exchange and HTTP functions running in a cluster.
//!
//! # Overview
//!
//! A delivery published with routing key `<function>.<marker>[...]` is turned
//! into an HTTP POST to `http://<function>.default.svc.cluster.local/`. The
//! function's JSON reply is posted on to the delivery's reply-to address and
//! the delivery is then settled with the broker. Processing is strictly
//! sequential.
//!
//! - [`routing`] maps routing keys to destinations and criticality
//! - [`dispatch`] invokes functions
//! - [`callback`] forwards results to their owner
//! - [`worker`] runs the consume loop and decides settlement
//! - [`transport`] holds the AMQP subscription
//!
//! # Quick Start
//!
//! ```rust
//! use function_relay::protocol::{Delivery, Task};
//! use function_relay::routing::route;
//!
//! let delivery = Delivery::new(1, "orders.critical.v2")
//!     .with_reply_to("http://caller.example/cb")
//!     .with_correlation_id("cid-1");
//!
//! let route = route(&delivery.routing_key).unwrap();
//! let task = Task::from_delivery(&delivery, &route);
//!
//! assert_eq!(task.destination, "http://orders.default.svc.cluster.local/");
//! assert!(task.critical);
//!
//! let json = serde_json::to_value(&task).unwrap();
//! assert_eq!(json["body"], "http://orders.default.svc.cluster.local/");
//! assert_eq!(json["correlationId"], "cid-1");
//! ```

pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod retry;
pub mod routing;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::{BrokerSection, DeliveryMode, HealthSection, RelayConfig, RelaySection};
pub use error::{RelayError, RelayResult};
pub use protocol::*;
pub use transport::amqp::AmqpClient;
pub use worker::{QueueWorker, Settlement};
