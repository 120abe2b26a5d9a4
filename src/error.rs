use thiserror::Error;

/// Error type for the consumer, worker pool and publisher.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Error originating from the underlying `lapin` library.
    #[error("RabbitMQ communication error: {0}")]
    Lapin(#[from] lapin::Error),

    /// Error reported by a broker channel implementation.
    #[error("Broker channel error: {0}")]
    Broker(#[from] BrokerError),

    /// Error during message (de)serialization.
    #[error("Failed to (de)serialize message: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Invalid setup, detected before any network I/O.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Error from the message handler logic.
    #[error("Message handler failed: {0}")]
    HandlerError(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// The handler returned a result that cannot be sent to the broker.
    #[error("Invalid handler result: {0}")]
    InvalidHandlerResult(String),

    /// Every publish attempt failed.
    #[error("Failed to publish to exchange '{exchange}' after {attempts} attempt(s): {last_error}")]
    PublishFailed {
        exchange: String,
        attempts: u32,
        last_error: String,
    },

    /// The worker pool no longer accepts tasks.
    #[error("Worker pool is shut down")]
    PoolShutDown,

    /// A tokio runtime could not be built.
    #[error("Failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl WorkerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        WorkerError::Configuration { message: message.into() }
    }
}

// Plain messages are handler failures; configuration errors go through `config`
impl From<&str> for WorkerError {
    fn from(s: &str) -> Self {
        WorkerError::HandlerError(s.into())
    }
}

impl From<String> for WorkerError {
    fn from(s: String) -> Self {
        WorkerError::HandlerError(s.into())
    }
}

/// Errors surfaced by a [`BrokerChannel`](crate::broker::BrokerChannel).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The consumer tag is already registered on this channel.
    #[error("consumer tag '{0}' is already in use")]
    ConsumerTagInUse(String),

    /// The connection or channel went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Any other protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        match e {
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                BrokerError::ConnectionLost(e.to_string())
            }
            lapin::Error::IOError(_) => BrokerError::ConnectionLost(e.to_string()),
            other => BrokerError::Protocol(other.to_string()),
        }
    }
}
