//! Defines the handler traits and the result contract they return.

use crate::delivery::Delivery;
use crate::error::WorkerError;
use async_trait::async_trait;
use serde::Deserialize;

/// What the consumer should tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Ack,
    Nack,
}

/// The outcome a handler returns for one delivery.
///
/// Prefer the constructors; the fields are public so that handlers ported from
/// loosely typed code can build the value directly, which is why
/// [`CallbackResult::decision`] validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackResult {
    pub action: AckAction,
    /// Only meaningful for [`AckAction::Nack`].
    pub requeue: bool,
}

impl CallbackResult {
    pub fn ack() -> Self {
        Self { action: AckAction::Ack, requeue: false }
    }

    /// Rejects the message without requeueing it, so the broker drops or
    /// dead-letters it.
    pub fn nack() -> Self {
        Self { action: AckAction::Nack, requeue: false }
    }

    /// Rejects the message and asks the broker to redeliver it.
    pub fn nack_requeue() -> Self {
        Self { action: AckAction::Nack, requeue: true }
    }

    /// Validates the result into the decision sent to the broker.
    pub fn decision(self) -> Result<AckDecision, WorkerError> {
        match (self.action, self.requeue) {
            (AckAction::Ack, false) => Ok(AckDecision::Ack),
            (AckAction::Ack, true) => Err(WorkerError::InvalidHandlerResult(
                "an acknowledged message cannot be requeued".to_string(),
            )),
            (AckAction::Nack, requeue) => Ok(AckDecision::Nack { requeue }),
        }
    }
}

/// A validated acknowledgment, ready to be sent on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack { requeue: bool },
}

impl AckDecision {
    /// Fail-closed decision used whenever a handler errors, panics or breaks
    /// the result contract.
    pub fn reject() -> Self {
        AckDecision::Nack { requeue: false }
    }

    pub fn is_ack(self) -> bool {
        self == AckDecision::Ack
    }
}

/// Processes raw deliveries from one queue.
///
/// Returning `Err` is exactly equivalent to returning [`CallbackResult::nack`]:
/// the message is rejected without requeue and the error is logged.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn process(&self, delivery: &Delivery) -> Result<CallbackResult, WorkerError>;

    /// A name for the handler, used for logging and identification.
    fn handler_name(&self) -> &str {
        "delivery-handler"
    }
}

/// A trait for processing JSON messages from a RabbitMQ queue.
///
/// Implement this trait for your specific message type and business logic,
/// then register it wrapped in a [`JsonHandler`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The type of the message that this handler can process.
    /// Must be deserializable from JSON.
    type MessageType: for<'de> Deserialize<'de> + Send + Sync;

    /// Processes a single deserialized message.
    ///
    /// # Arguments
    /// * `message` - The deserialized message payload.
    /// * `delivery` - The raw delivery, for headers and routing metadata.
    async fn handle_message(
        &self,
        message: Self::MessageType,
        delivery: &Delivery,
    ) -> Result<CallbackResult, WorkerError>;

    /// A name for the handler, used for logging and identification.
    fn handler_name(&self) -> &str;
}

/// Adapts a [`MessageHandler`] into a [`DeliveryHandler`] by decoding the
/// payload first. Undecodable payloads are rejected without requeue.
pub struct JsonHandler<H> {
    inner: H,
}

impl<H: MessageHandler> JsonHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: MessageHandler> DeliveryHandler for JsonHandler<H> {
    async fn process(&self, delivery: &Delivery) -> Result<CallbackResult, WorkerError> {
        let message: H::MessageType = match delivery.json() {
            Ok(msg) => msg,
            Err(e) => {
                log::error!(
                    "Failed to parse message on Queue<{}>, rejecting. Tag: {}, Error: {}",
                    delivery.queue,
                    delivery.delivery_tag,
                    e
                );
                return Ok(CallbackResult::nack());
            }
        };
        self.inner().handle_message(message, delivery).await
    }

    fn handler_name(&self) -> &str {
        self.inner().handler_name()
    }
}
