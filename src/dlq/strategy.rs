//! Dead-letter-queue strategy: what to do once retries are exhausted.
//!
//! Modeled as a tagged variant rather than a handler hierarchy, per the
//! source system's own design note: "Strategy polymorphism for DLQ is best
//! expressed as a tagged variant ... avoid deep hierarchies."

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use super::{DlqError, DlqMessage};
use crate::producer::ProducerCore;

/// A user-supplied DLQ handler for the `Custom` strategy variant.
#[async_trait]
pub trait CustomDlqHandler: Send + Sync {
    async fn handle_failure(
        &self,
        ctx: &CancellationToken,
        message: &DlqMessage,
    ) -> Result<(), DlqError>;

    fn name(&self) -> &str;
}

/// What to do with a message once its handler has exhausted all retries.
#[derive(Clone)]
pub enum DlqStrategy {
    /// Serializes the [`DlqMessage`] as JSON and publishes it to `topic`
    /// via `producer`, keyed by the original message's key.
    PublishToTopic {
        producer: Arc<ProducerCore>,
        topic: String,
    },
    /// Emits a structured error log; no further action.
    LogOnly,
    /// No-op.
    Discard,
    /// User-supplied handler for anything else.
    Custom(Arc<dyn CustomDlqHandler>),
}

impl DlqStrategy {
    /// This is the last chance for a failed message: the consumer core's
    /// commit decision depends on whether this returns `Ok`.
    pub async fn handle_failure(
        &self,
        ctx: &CancellationToken,
        dlq_message: &DlqMessage,
    ) -> Result<(), DlqError> {
        match self {
            DlqStrategy::PublishToTopic { producer, topic } => {
                publish_to_topic(producer, topic, ctx, dlq_message).await
            }
            DlqStrategy::LogOnly => {
                error!(
                    "DLQ (log-only): topic={} partition={} offset={} attempts={} error={}",
                    dlq_message.topic,
                    dlq_message.partition,
                    dlq_message.offset,
                    dlq_message.attempts,
                    dlq_message.error
                );
                Ok(())
            }
            DlqStrategy::Discard => {
                debug!(
                    "DLQ (discard): dropping topic={} partition={} offset={}",
                    dlq_message.topic, dlq_message.partition, dlq_message.offset
                );
                Ok(())
            }
            DlqStrategy::Custom(handler) => handler.handle_failure(ctx, dlq_message).await,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DlqStrategy::PublishToTopic { .. } => "publish_to_topic",
            DlqStrategy::LogOnly => "log_only",
            DlqStrategy::Discard => "discard",
            DlqStrategy::Custom(handler) => handler.name(),
        }
    }
}

async fn publish_to_topic(
    producer: &ProducerCore,
    topic: &str,
    ctx: &CancellationToken,
    dlq_message: &DlqMessage,
) -> Result<(), DlqError> {
    let body = serde_json::to_vec(dlq_message)?;
    let headers = dlq_headers(dlq_message);

    warn!(
        "Publishing DLQ message: original_topic={} partition={} offset={} -> dlq_topic={}",
        dlq_message.topic, dlq_message.partition, dlq_message.offset, topic
    );

    producer
        .publish(ctx, topic, dlq_message.key.as_deref(), &headers, &body)
        .await
        .map_err(DlqError::from)
}

/// Builds the outgoing DLQ headers: `dlq_*` metadata plus each original
/// header re-prefixed `original_<key>`.
fn dlq_headers(dlq_message: &DlqMessage) -> HashMap<String, String> {
    let mut headers = HashMap::with_capacity(dlq_message.headers.len() + 7);
    headers.insert("dlq_version".to_string(), "1.0".to_string());
    headers.insert(
        "dlq_original_topic".to_string(),
        dlq_message.topic.clone(),
    );
    headers.insert("dlq_error".to_string(), dlq_message.error.clone());
    headers.insert(
        "dlq_attempts".to_string(),
        dlq_message.attempts.to_string(),
    );
    headers.insert(
        "dlq_service".to_string(),
        dlq_message.service_name.clone(),
    );
    headers.insert(
        "dlq_environment".to_string(),
        dlq_message.environment.clone(),
    );
    headers.insert(
        "dlq_timestamp".to_string(),
        dlq_message
            .error_timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    for (key, value) in &dlq_message.headers {
        headers.insert(format!("original_{}", key), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::message::build_dlq_message;
    use crate::config::DlqConfig;

    fn sample_dlq_message() -> DlqMessage {
        let mut msg_headers = HashMap::new();
        msg_headers.insert("event_type".to_string(), "order.created".to_string());
        let message = crate::broker::Message {
            topic: "orders".to_string(),
            partition: 1,
            offset: 9,
            key: Some(b"key-1".to_vec()),
            value: Some(b"payload".to_vec()),
            headers: msg_headers,
            timestamp: chrono::Utc::now(),
        };
        build_dlq_message(
            &message,
            "boom",
            "HandlerError",
            3,
            3,
            "group",
            &[],
            &DlqConfig::default(),
        )
    }

    #[test]
    fn test_dlq_headers_shape() {
        let dlq_message = sample_dlq_message();
        let headers = dlq_headers(&dlq_message);

        assert_eq!(headers.get("dlq_version").unwrap(), "1.0");
        assert_eq!(headers.get("dlq_original_topic").unwrap(), "orders");
        assert_eq!(headers.get("dlq_attempts").unwrap(), "3");
        assert_eq!(headers.get("original_event_type").unwrap(), "order.created");
    }

    #[tokio::test]
    async fn test_log_only_always_succeeds() {
        let strategy = DlqStrategy::LogOnly;
        let result = strategy
            .handle_failure(&CancellationToken::new(), &sample_dlq_message())
            .await;
        assert!(result.is_ok());
        assert_eq!(strategy.name(), "log_only");
    }

    #[tokio::test]
    async fn test_discard_always_succeeds() {
        let strategy = DlqStrategy::Discard;
        let result = strategy
            .handle_failure(&CancellationToken::new(), &sample_dlq_message())
            .await;
        assert!(result.is_ok());
        assert_eq!(strategy.name(), "discard");
    }
}
