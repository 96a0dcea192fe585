//! The broker abstraction this runtime depends on.
//!
//! Connection handling, wire protocol framing and partition assignment are
//! explicitly out of scope for this crate (see `SPEC_FULL.md` §1) — they
//! live behind [`BrokerSession`], injected by the caller. A default
//! implementation backed by `rdkafka` is available behind the
//! `rdkafka-broker` feature; see [`rdkafka_session`].

#[cfg(feature = "rdkafka-broker")]
pub mod rdkafka_session;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// An inbound message delivered by [`BrokerSession::fetch`]. Immutable once
/// delivered.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// Last-write-wins on duplicate header keys.
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Looks up the `event_type` header, defaulting to `""` when absent —
    /// used by the consumer core's dispatch algorithm.
    pub fn event_type(&self) -> &str {
        self.headers.get("event_type").map(String::as_str).unwrap_or("")
    }
}

/// Strategy object for broker authentication, standing in for the
/// connection-level TLS/SASL configuration a real client would need. Passed
/// to a `BrokerSession` constructor, never inspected by the consumer/producer
/// cores themselves.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    PlainText,
    Tls {
        ca_pem: String,
        cert_pem: String,
        key_pem: String,
    },
    SaslPlain {
        username: String,
        password: String,
    },
}

/// Errors raised by a [`BrokerSession`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("client is not connected")]
    ClientNotConnected,
    #[error("client is already connected")]
    ClientAlreadyConnected,
    #[error("client is closed")]
    ClientClosed,
    #[error("invalid brokers: {0}")]
    InvalidBrokers(String),
    #[error("invalid auth strategy: {0}")]
    InvalidAuthStrategy(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("broker error: {0}")]
    Other(String),
}

/// The broker collaborator the consumer/producer cores depend on.
///
/// Every method is cancellation-aware: a cancelled `ctx` must cause the
/// in-flight call to return promptly with [`BrokerError::Cancelled`] (or
/// whatever partial progress already committed), never hang.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Blocks until a message is available or `ctx` ends.
    async fn fetch(&self, ctx: &CancellationToken) -> Result<Message, BrokerError>;

    /// Commits the offset for `message`, acknowledging it will not be
    /// redelivered.
    async fn commit(&self, ctx: &CancellationToken, message: &Message) -> Result<(), BrokerError>;

    /// Publishes `body` to `topic`, keyed by `key`, carrying `headers`. Used
    /// both for DLQ publication and app-level production via
    /// [`crate::producer::ProducerCore`].
    async fn publish(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        key: Option<&[u8]>,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), BrokerError>;

    /// Releases the underlying connection. Implementations must make this
    /// idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}
