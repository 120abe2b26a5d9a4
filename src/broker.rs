//! The seam between the consumer and the AMQP client.
//!
//! The consumer only talks to the broker through [`BrokerChannel`], and only
//! from its I/O thread. [`crate::lapin_channel::LapinChannel`] is the
//! production implementation.

use crate::delivery::Delivery;
use crate::error::BrokerError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;

/// Stream of deliveries for one registered consumer. An `Err` item means the
/// connection is gone.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

/// Channel operations the consumer and its publisher need.
///
/// The consumer issues every call from its I/O thread, one at a time, so
/// implementations do not need to coordinate concurrent callers.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(&self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    /// Starts a consumer. Fails with [`BrokerError::ConsumerTagInUse`] when
    /// `consumer_tag` is already registered.
    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Publishes `payload` to `exchange` with string `headers` as the
    /// message's header table. Resolves once the broker has taken it.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError>;

    /// Closes the channel and its connection.
    async fn close(&self) -> Result<(), BrokerError>;
}
