/// Errors raised by [`super::ConsumerCore`].
///
/// Per `spec.md` §7, the core only ever returns an error upward from
/// `close()` (drain timeout or broker close failure), `consume_with_worker_pool`
/// (cancellation), and construction-time validation; `NoHandler` and
/// `ConsumeFailed` are otherwise only ever surfaced through
/// [`crate::error_channel::ErrorChannel`], never returned.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer is closed")]
    ConsumerClosed,
    #[error("no handler registered for event type {0:?}")]
    NoHandler(String),
    #[error("fetch failed: {0}")]
    ConsumeFailed(#[from] crate::broker::BrokerError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("dlq.enabled is true but no DlqStrategy was provided")]
    MissingDlqStrategy,
    #[error("shutdown drain deadline ({0:?}) exceeded")]
    DrainTimeout(std::time::Duration),
    #[error("broker close failed: {0}")]
    CloseFailed(#[source] crate::broker::BrokerError),
}
