/// Errors raised while handling a terminally-failed message via a [`crate::dlq::DlqStrategy`].
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("failed to serialize DLQ message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish DLQ message: {0}")]
    Publish(#[from] crate::producer::ProducerError),
    #[error("custom DLQ handler {name} failed: {reason}")]
    Custom { name: String, reason: String },
}
