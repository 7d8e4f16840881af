//! AMQP 0-9-1 subscription for the relay
//!
//! # Architecture
//!
//! - [`connection`] - Pure topology settings and message conversion
//! - [`client`] - Impure I/O against the broker
//!
//! # Usage
//!
//! ```rust,no_run
//! use function_relay::config::BrokerSection;
//! use function_relay::transport::amqp::AmqpClient;
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerSection::default();
//! let mut client = AmqpClient::connect(&broker).await?;
//! client.declare_topology(&broker).await?;
//! client.start_consuming(&broker.consumer_tag()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

pub use client::AmqpClient;
pub use connection::{AmqpError, TopologySettings};
