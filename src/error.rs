//! Error types and reporting utilities for the streamforge runtime.
//!
//! This module defines the primary error enum, [`Error`], which aggregates
//! sub-errors from configuration, the broker abstraction, the consumer and
//! producer cores, and the DLQ. It also includes a helper function,
//! [`report`], for generating a readable error trace by walking `source()`
//! causes.

/// Top-level error type for the streamforge runtime.
///
/// Wraps the more specific errors raised by each module. Each variant
/// implements `std::error::Error` and converts from the underlying type via
/// `#[from]`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wraps a configuration validation error.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Wraps an error raised by the injected broker session.
    #[cfg(feature = "runtime")]
    #[error("Broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    /// Wraps an error raised by the consumer core.
    #[cfg(feature = "runtime")]
    #[error("Consumer error: {0}")]
    Consumer(#[from] crate::consumer::ConsumerError),

    /// Wraps an error raised by the producer core.
    #[cfg(feature = "runtime")]
    #[error("Producer error: {0}")]
    Producer(#[from] crate::producer::ProducerError),

    /// Wraps an error raised by the DLQ strategy.
    #[cfg(feature = "runtime")]
    #[error("DLQ error: {0}")]
    Dlq(#[from] crate::dlq::DlqError),
}

/// Generates a readable error trace by traversing all `source()` causes of
/// the given error.
///
/// The returned `String` contains the primary error message, followed by
/// each causal error (if any) on its own line, preceded by `"Caused by:"`.
pub fn report(mut err: &dyn std::error::Error) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        s.push_str(&format!("\n\nCaused by: {}", src));
        err = src;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_error_and_report() {
        let cfg_err = ConfigError::InvalidDuration("retryBackoff", "0s".to_string());
        let err = Error::from(cfg_err);

        let message = format!("{}", err);
        assert!(message.contains("Config error"));

        let report_output = report(&err);
        assert!(report_output.contains("retryBackoff"));
    }
}
