//! Inbound message record handed to handlers.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Header carrying the W3C trace context of the producer.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying the free-text event name set by the publisher.
pub const EVENT_NAME_HEADER: &str = "event_name";

/// One message received from the broker.
///
/// Handlers only ever see a `&Delivery`; the consumer keeps ownership so the
/// acknowledgment can be tied back to `delivery_tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped identifier used to ack or nack this message.
    pub delivery_tag: u64,
    /// Queue the message was consumed from.
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    /// Set by the broker when the message was delivered before and not acked.
    pub redelivered: bool,
    pub timestamp: Option<DateTime<Utc>>,
    /// String-valued message headers. Non-string AMQP values are not carried.
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn traceparent(&self) -> Option<&str> {
        self.header(TRACEPARENT_HEADER)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.header(EVENT_NAME_HEADER)
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Deserializes the JSON payload.
    pub fn json<'de, T: Deserialize<'de>>(&'de self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
