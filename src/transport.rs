//! HTTP delivery of a single publish attempt to the management API.

use async_trait::async_trait;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully built publish call: where to POST and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Serialized publish envelope.
    pub body: String,
}

/// Why one attempt failed. Every variant is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error("server responded {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
}

/// Sends one publish attempt. Implementations must not retry themselves.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn send(&self, request: &PublishRequest) -> Result<(), AttemptError>;

    /// Blocking variant. Must not be called from inside an async runtime.
    fn send_blocking(&self, request: &PublishRequest) -> Result<(), AttemptError>;
}

/// `reqwest` backed transport.
///
/// The async client is shared by every publish. The blocking client is only
/// built on the first blocking send, then reused.
pub struct ReqwestTransport {
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            blocking: OnceLock::new(),
        })
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, AttemptError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        // A concurrent first call may have won; either client is fine
        Ok(self.blocking.get_or_init(|| client))
    }
}

#[async_trait]
impl PublishTransport for ReqwestTransport {
    async fn send(&self, request: &PublishRequest) -> Result<(), AttemptError> {
        let response = self
            .client
            .post(&request.url)
            .basic_auth(&request.username, Some(&request.password))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                log::debug!("Message send failed, error: {}", e);
                AttemptError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        log::debug!("Failed to send MQ message, server response: {} {}", status, body);
        Err(AttemptError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn send_blocking(&self, request: &PublishRequest) -> Result<(), AttemptError> {
        let response = self
            .blocking_client()?
            .post(&request.url)
            .basic_auth(&request.username, Some(&request.password))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone())
            .send()
            .map_err(|e| {
                log::debug!("Message send failed, error: {}", e);
                AttemptError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        log::debug!("Failed to send MQ message, server response: {} {}", status, body);
        Err(AttemptError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
