//! The enriched failure record published to (or logged by) the DLQ.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::Message;
use crate::config::DlqConfig;
use crate::retry::RetryRecord;

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => base64::engine::general_purpose::STANDARD
                .encode(bytes)
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Enriched failure record, JSON-serializable, published to the DLQ topic
/// (or logged, depending on the configured [`crate::dlq::DlqStrategy`]).
///
/// Wire format: snake_case fields, `key`/`value` base64-encoded,
/// `retry_history` omitted when empty, timestamps RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(with = "base64_bytes")]
    pub key: Option<Vec<u8>>,
    #[serde(with = "base64_bytes")]
    pub value: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
    pub error: String,
    pub error_type: String,
    pub error_timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub first_attempt: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_history: Vec<RetryRecord>,
    pub consumer_group: String,
    pub service_name: String,
    pub environment: String,
    pub original_event: String,
    /// Reserved for implementers; always empty coming out of the builder.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Builds a [`DlqMessage`] from the failed message, its error text, the
/// attempt count, and the retry history accumulated so far.
///
/// `error_type` is a stable textual discriminator of the error's dynamic
/// kind (e.g. `"HandlerError"`, or `"Panic"` for a recovered panic) — Rust
/// has no generic reflection over `dyn Error`, so callers supply it.
pub fn build_dlq_message(
    message: &Message,
    error_text: impl Into<String>,
    error_type: impl Into<String>,
    attempts: u32,
    max_attempts: u32,
    consumer_group: impl Into<String>,
    history: &[RetryRecord],
    config: &DlqConfig,
) -> DlqMessage {
    let now = Utc::now();
    let first_attempt = history.first().map(|r| r.timestamp).unwrap_or(now);
    let original_event = message
        .headers
        .get("event_type")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    DlqMessage {
        topic: message.topic.clone(),
        partition: message.partition,
        offset: message.offset,
        key: message.key.clone(),
        value: message.value.clone(),
        headers: message.headers.clone(),
        error: error_text.into(),
        error_type: error_type.into(),
        error_timestamp: now,
        attempts,
        max_attempts,
        first_attempt,
        last_attempt: now,
        retry_history: history.to_vec(),
        consumer_group: consumer_group.into(),
        service_name: config.service_name.clone(),
        environment: config.environment.clone(),
        original_event,
        metadata: HashMap::new(),
    }
}
