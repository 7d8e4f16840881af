//! Impure I/O operations for the AMQP client
//!
//! This module owns the lapin connection, channel and consumer. Topology
//! and message conversion live in the pure `connection` module.

use super::connection::{delivery_from_parts, AmqpError, TopologySettings};
use crate::config::BrokerSection;
use crate::observability::metrics;
use crate::protocol::Delivery;
use crate::transport::Subscription;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueBindOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, error, info, warn, Instrument};

/// AMQP subscription client for the relay's function queue
pub struct AmqpClient {
    connection: Connection,
    channel: Channel,
    consumer: Option<Consumer>,
    topology: Option<TopologySettings>,
}

impl AmqpClient {
    /// Open a connection and a channel with prefetch of one
    pub async fn connect(broker: &BrokerSection) -> Result<Self, AmqpError> {
        let uri = broker.amqp_uri()?;
        metrics().broker_connection_attempt();
        info!(broker = %broker.redacted_uri(), "Connecting to AMQP broker");

        let connection = match Connection::connect(&uri, ConnectionProperties::default()).await {
            Ok(connection) => connection,
            Err(e) => {
                metrics().broker_connection_failed();
                error!(broker = %broker.redacted_uri(), error = %e, "AMQP connection failed");
                return Err(AmqpError::ConnectionFailed(e));
            }
        };

        let channel = connection
            .create_channel()
            .await
            .map_err(AmqpError::ChannelFailed)?;

        let prefetch = TopologySettings::from_broker(broker).prefetch;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(AmqpError::ChannelFailed)?;

        metrics().broker_connection_established();
        info!(prefetch, "AMQP channel open");

        Ok(Self {
            connection,
            channel,
            consumer: None,
            topology: None,
        })
    }

    /// Declare the topic exchange, the dead-lettering queue and their binding
    pub async fn declare_topology(&mut self, broker: &BrokerSection) -> Result<(), AmqpError> {
        let topology = TopologySettings::from_broker(broker);
        let span = crate::amqp_span!(
            exchange = %topology.exchange,
            queue = %topology.queue,
            routing_key = %topology.routing_key
        );

        self.declare(&topology).instrument(span).await?;
        self.topology = Some(topology);
        Ok(())
    }

    async fn declare(&self, topology: &TopologySettings) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &topology.exchange,
                TopologySettings::exchange_kind(),
                TopologySettings::exchange_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| AmqpError::ExchangeDeclare {
                name: topology.exchange.clone(),
                source,
            })?;

        self.channel
            .queue_declare(
                &topology.queue,
                TopologySettings::queue_options(),
                topology.queue_arguments(),
            )
            .await
            .map_err(|source| AmqpError::QueueDeclare {
                name: topology.queue.clone(),
                source,
            })?;

        self.channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| AmqpError::QueueBind {
                queue: topology.queue.clone(),
                exchange: topology.exchange.clone(),
                routing_key: topology.routing_key.clone(),
                source,
            })?;

        info!("Topology declared");
        Ok(())
    }

    /// Register a manually-acknowledged consumer on the declared queue
    pub async fn start_consuming(&mut self, consumer_tag: &str) -> Result<(), AmqpError> {
        let topology = self.topology.as_ref().ok_or(AmqpError::NotConsuming)?;

        let consumer = self
            .channel
            .basic_consume(
                &topology.queue,
                consumer_tag,
                TopologySettings::consume_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| AmqpError::Consume {
                tag: consumer_tag.to_string(),
                source,
            })?;

        info!(queue = %topology.queue, consumer_tag, "Consuming deliveries");
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Publish a message to an exchange, used by the task publishing tool
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let map_err = |source| AmqpError::PublishFailed {
            exchange: exchange.to_string(),
            source,
        };

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(map_err)?
            .await
            .map_err(map_err)?;

        debug!(exchange, routing_key, bytes = payload.len(), "Published message");
        Ok(())
    }

    /// Close the channel and the connection
    pub async fn close(self) -> Result<(), AmqpError> {
        if let Err(e) = self.channel.close(200, "relay shutting down").await {
            warn!(error = %e, "Channel close failed");
        }
        self.connection
            .close(200, "relay shutting down")
            .await
            .map_err(AmqpError::ConnectionFailed)?;
        info!("AMQP connection closed");
        Ok(())
    }
}

#[async_trait]
impl Subscription for AmqpClient {
    type Error = AmqpError;

    async fn next_delivery(&mut self) -> Option<Result<Delivery, Self::Error>> {
        let consumer = match self.consumer.as_mut() {
            Some(consumer) => consumer,
            None => return Some(Err(AmqpError::NotConsuming)),
        };

        match consumer.next().await {
            Some(Ok(message)) => Some(Ok(delivery_from_parts(
                message.delivery_tag,
                message.routing_key.as_str(),
                message.redelivered,
                &message.properties,
                message.data,
            ))),
            Some(Err(e)) => {
                metrics().broker_connection_lost();
                Some(Err(AmqpError::DeliveryFailed(e)))
            }
            None if !self.connection.status().connected() => {
                metrics().broker_connection_lost();
                Some(Err(AmqpError::ConnectionLost))
            }
            None => None,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|source| AmqpError::Ack {
                tag: delivery.delivery_tag,
                source,
            })
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), Self::Error> {
        self.channel
            .basic_nack(
                delivery.delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|source| AmqpError::Nack {
                tag: delivery.delivery_tag,
                source,
            })
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}
