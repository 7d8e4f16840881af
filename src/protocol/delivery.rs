//! Broker delivery as seen by the relay
//!
//! The transport converts its native message type into a [`Delivery`] so the
//! worker and its tests never touch broker client types.

/// One message handed to the relay by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag used to settle the delivery
    pub delivery_tag: u64,
    /// Dot-delimited key, `<function>.<marker>[...]`
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// Callback URL of the caller
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    /// Set by the broker when this delivery was requeued before
    pub redelivered: bool,
    /// Times the broker dead-lettered this message, from its `x-death` header
    pub death_count: u32,
}

impl Delivery {
    pub fn new(delivery_tag: u64, routing_key: impl Into<String>) -> Self {
        Self {
            delivery_tag,
            routing_key: routing_key.into(),
            payload: Vec::new(),
            reply_to: None,
            correlation_id: None,
            redelivered: false,
            death_count: 0,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn with_death_count(mut self, death_count: u32) -> Self {
        self.death_count = death_count;
        self
    }

    /// True once the broker has requeued or dead-lettered this message
    pub fn has_failed_before(&self) -> bool {
        self.redelivered || self.death_count > 0
    }

    /// Reply-to address, empty when the publisher did not set one
    pub fn reply_to_or_empty(&self) -> &str {
        self.reply_to.as_deref().unwrap_or_default()
    }

    pub fn correlation_id_or_empty(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or_default()
    }

    /// Payload rendered for debug logs
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
