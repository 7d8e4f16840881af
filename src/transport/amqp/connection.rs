//! Pure topology settings and message conversion for the AMQP client
//!
//! Everything here is free of I/O so the broker contract (exchange type,
//! queue arguments, consumer flags) can be checked without a broker.

use crate::config::{BrokerSection, ConfigError};
use crate::protocol::Delivery;
use lapin::options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, ExchangeKind};
use thiserror::Error;

/// Queue argument naming the exchange rejected deliveries are routed to
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Queue argument replacing the routing key of rejected deliveries
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Header the broker appends each time a message is dead-lettered
pub const DEATH_HEADER: &str = "x-death";

/// AMQP transport errors
#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] lapin::Error),
    #[error("Failed to open a channel: {0}")]
    ChannelFailed(#[source] lapin::Error),
    #[error("Failed to declare exchange '{name}': {source}")]
    ExchangeDeclare {
        name: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to declare queue '{name}': {source}")]
    QueueDeclare {
        name: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to bind queue '{queue}' to '{exchange}' with '{routing_key}': {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to register consumer '{tag}': {source}")]
    Consume {
        tag: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Broker connection lost")]
    ConnectionLost,
    #[error("Delivery stream failed: {0}")]
    DeliveryFailed(#[source] lapin::Error),
    #[error("Failed to acknowledge delivery {tag}: {source}")]
    Ack {
        tag: u64,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to reject delivery {tag}: {source}")]
    Nack {
        tag: u64,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to publish to '{exchange}': {source}")]
    PublishFailed {
        exchange: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Not consuming - topology must be declared and a consumer registered first")]
    NotConsuming,
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Exchange, queue and binding the relay consumes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySettings {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_routing_key: String,
    /// Unacknowledged deliveries the broker may push at once
    pub prefetch: u16,
}

impl TopologySettings {
    pub fn from_broker(broker: &BrokerSection) -> Self {
        Self {
            exchange: broker.exchange.clone(),
            queue: broker.queue.clone(),
            routing_key: broker.routing_key.clone(),
            dead_letter_routing_key: broker.dead_letter_routing_key.clone(),
            // One delivery in flight keeps processing strictly sequential
            prefetch: 1,
        }
    }

    pub fn exchange_kind() -> ExchangeKind {
        ExchangeKind::Topic
    }

    /// Durable, not auto-deleted, not internal
    pub fn exchange_options() -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        }
    }

    /// Non-durable, shared, kept when unused
    pub fn queue_options() -> QueueDeclareOptions {
        QueueDeclareOptions::default()
    }

    /// Rejected deliveries go back to the relay's exchange under a key the
    /// queue's own binding does not match
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            DEAD_LETTER_EXCHANGE_ARG.into(),
            AMQPValue::LongString(self.exchange.as_str().into()),
        );
        arguments.insert(
            DEAD_LETTER_ROUTING_KEY_ARG.into(),
            AMQPValue::LongString(self.dead_letter_routing_key.as_str().into()),
        );
        arguments
    }

    /// Manual acknowledgement, non-exclusive
    pub fn consume_options() -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_ack: false,
            exclusive: false,
            ..Default::default()
        }
    }
}

/// Convert broker message parts into a relay delivery
pub fn delivery_from_parts(
    delivery_tag: u64,
    routing_key: &str,
    redelivered: bool,
    properties: &BasicProperties,
    payload: Vec<u8>,
) -> Delivery {
    Delivery {
        delivery_tag,
        routing_key: routing_key.to_string(),
        payload,
        reply_to: properties
            .reply_to()
            .as_ref()
            .map(|reply_to| reply_to.as_str().to_string()),
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        redelivered,
        death_count: death_count(properties),
    }
}

/// Sum of the `count` fields of the `x-death` header, 0 when absent
pub fn death_count(properties: &BasicProperties) -> u32 {
    let deaths = match properties.headers().as_ref().and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == DEATH_HEADER)
            .map(|(_, value)| value)
    }) {
        Some(AMQPValue::FieldArray(deaths)) => deaths,
        _ => return 0,
    };

    deaths
        .as_slice()
        .iter()
        .filter_map(|death| match death {
            AMQPValue::FieldTable(death) => death
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == "count")
                .and_then(|(_, count)| integer_value(count)),
            _ => None,
        })
        .fold(0u32, u32::saturating_add)
}

fn integer_value(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}
