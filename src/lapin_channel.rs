//! [`BrokerChannel`] over a `lapin` connection.

use crate::broker::{BrokerChannel, DeliveryStream, ExchangeKind};
use crate::delivery::Delivery;
use crate::error::{BrokerError, WorkerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

const REPLY_SUCCESS: u16 = 200;

/// One AMQP connection with a single channel.
pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
    // Tags registered through this channel, checked before asking the broker
    consumer_tags: Mutex<HashSet<String>>,
}

impl LapinChannel {
    /// Connects to the broker and opens a channel.
    pub async fn connect(uri: &str) -> Result<Self, WorkerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        log::info!("Connected to RabbitMQ, channel {} open", channel.id());
        Ok(Self {
            connection,
            channel,
            consumer_tags: Mutex::new(HashSet::new()),
        })
    }

    fn reserve_tag(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut tags = self
            .consumer_tags
            .lock()
            .map_err(|_| BrokerError::Protocol("consumer tag registry poisoned".to_string()))?;
        if !tags.insert(consumer_tag.to_string()) {
            return Err(BrokerError::ConsumerTagInUse(consumer_tag.to_string()));
        }
        Ok(())
    }

    fn release_tag(&self, consumer_tag: &str) {
        if let Ok(mut tags) = self.consumer_tags.lock() {
            tags.remove(consumer_tag);
        }
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        };
        self.channel
            .exchange_declare(
                exchange,
                kind,
                ExchangeDeclareOptions { durable, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn queue_declare(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions { durable, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        self.reserve_tag(consumer_tag)?;
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                self.release_tag(consumer_tag);
                return Err(e.into());
            }
        };

        let queue = queue.to_string();
        Ok(consumer
            .map(move |item| {
                item.map(|delivery| convert_delivery(&queue, delivery))
                    .map_err(BrokerError::from)
            })
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        self.release_tag(consumer_tag);
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { requeue, ..Default::default() })
            .await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default().with_headers(header_table(headers));
        self.channel
            .basic_publish(exchange, routing_key, BasicPublishOptions::default(), payload, properties)
            .await?
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        self.connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

fn convert_delivery(queue: &str, delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(string_headers)
        .unwrap_or_default();
    let timestamp = delivery
        .properties
        .timestamp()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

    Delivery {
        delivery_tag: delivery.delivery_tag,
        queue: queue.to_string(),
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        redelivered: delivery.redelivered,
        timestamp,
        headers,
        payload: delivery.data,
    }
}

/// Keeps the string-valued entries of an AMQP header table.
fn string_headers(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

fn header_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(key.as_str().into(), AMQPValue::LongString(value.as_str().into()));
    }
    table
}
