//! # RabbitMQ Relay
//! A RabbitMQ consumer that runs handlers on a worker pool while keeping every
//! channel operation on one I/O thread, plus a publisher for the management
//! HTTP API with bounded, jittered retries.

pub mod broker;
pub mod consumer;
pub mod delivery;
mod env;
pub mod error;
pub mod handler;
pub mod lapin_channel;
pub mod payload;
pub mod pool;
pub mod publisher;
pub mod retry;
pub mod trace;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export key components for easy access
pub use broker::{BrokerChannel, DeliveryStream, ExchangeKind};
pub use consumer::{ChannelPublisher, Consumer, ConsumerConfig, ConsumerConfigBuilder, StopHandle};
pub use delivery::{Delivery, EVENT_NAME_HEADER, TRACEPARENT_HEADER};
pub use error::{BrokerError, WorkerError};
pub use handler::{AckAction, AckDecision, CallbackResult, DeliveryHandler, JsonHandler, MessageHandler};
pub use lapin_channel::LapinChannel;
pub use pool::{TaskError, TaskHandle, TaskPanicked, WorkerPool};
pub use publisher::{MessageProperties, OutboundMessage, PublishOptions, Publisher, PublisherConfig};
pub use retry::{RetryExhausted, RetryPolicy};
pub use trace::{LogTracer, Outcome, TraceParent, Tracer, Transaction};
pub use transport::{AttemptError, PublishRequest, PublishTransport, ReqwestTransport};
