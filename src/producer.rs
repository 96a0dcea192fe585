//! Single-topic-agnostic publisher with retry and batch, used directly by
//! applications and by [`crate::dlq::DlqStrategy::PublishToTopic`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, BrokerSession};
use crate::config::ProducerSettings;
use crate::retry::RetryPolicy;

/// Errors raised by [`ProducerCore`].
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("producer is closed")]
    ProducerClosed,
    #[error("publish cancelled")]
    Cancelled,
    #[error("publish to {topic} failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        topic: String,
        attempts: u32,
        #[source]
        source: BrokerError,
    },
    #[error("publish failed: {0}")]
    PublishFailed(#[from] BrokerError),
}

/// Publishes to a broker session with a bounded number of attempts and an
/// exponential backoff between them, identical in shape to the consumer's
/// retry schedule (`retryBackoff -> maxRetryBackoff`).
pub struct ProducerCore {
    broker: Arc<dyn BrokerSession>,
    max_attempts: u32,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    closed: AtomicBool,
}

impl ProducerCore {
    pub fn new(
        broker: Arc<dyn BrokerSession>,
        settings: &ProducerSettings,
        retry_backoff: Duration,
        max_retry_backoff: Duration,
    ) -> Self {
        Self {
            broker,
            max_attempts: settings.max_attempts.max(1),
            retry_backoff,
            max_retry_backoff,
            closed: AtomicBool::new(false),
        }
    }

    /// Publishes `body` to `topic`, retrying up to `max_attempts` times with
    /// exponential backoff. Returns immediately on success; on exhaustion
    /// returns [`ProducerError::MaxRetriesExceeded`].
    pub async fn publish(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        key: Option<&[u8]>,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), ProducerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProducerError::ProducerClosed);
        }

        let mut backoff = self.retry_backoff;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if ctx.is_cancelled() {
                return Err(ProducerError::Cancelled);
            }
            match self.broker.publish(ctx, topic, key, headers, body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "publish attempt {}/{} to topic {} failed: {}",
                        attempt, self.max_attempts, topic, e
                    );
                    last_error = Some(e);
                    if attempt == self.max_attempts {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => return Err(ProducerError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = RetryPolicy::next(backoff, self.max_retry_backoff);
                }
            }
        }

        Err(ProducerError::MaxRetriesExceeded {
            topic: topic.to_string(),
            attempts: self.max_attempts,
            source: last_error.expect("at least one publish attempt was made"),
        })
    }

    /// Publishes each `(key, headers, body)` item to `topic` in turn,
    /// stopping at the first failure.
    pub async fn publish_batch(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        items: &[(Option<Vec<u8>>, HashMap<String, String>, Vec<u8>)],
    ) -> Result<(), ProducerError> {
        for (key, headers, body) in items {
            self.publish(ctx, topic, key.as_deref(), headers, body)
                .await?;
        }
        Ok(())
    }

    /// Idempotent via a one-shot guard: a second call is a no-op success.
    pub async fn close(&self) -> Result<(), ProducerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.broker.close().await.map_err(ProducerError::PublishFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use crate::broker::Message;

    struct FlakyBroker {
        failures_remaining: Mutex<u32>,
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl BrokerSession for FlakyBroker {
        async fn fetch(&self, _ctx: &CancellationToken) -> Result<Message, BrokerError> {
            unimplemented!("not exercised by producer tests")
        }

        async fn commit(&self, _ctx: &CancellationToken, _message: &Message) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(
            &self,
            _ctx: &CancellationToken,
            _topic: &str,
            _key: Option<&[u8]>,
            _headers: &HashMap<String, String>,
            _body: &[u8],
        ) -> Result<(), BrokerError> {
            *self.attempts.lock().unwrap() += 1;
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Err(BrokerError::Other("transient".to_string()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn settings(max_attempts: u32) -> ProducerSettings {
        ProducerSettings {
            max_attempts,
            ..ProducerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_publish_succeeds_on_first_try() {
        let broker = Arc::new(FlakyBroker {
            failures_remaining: Mutex::new(0),
            attempts: Mutex::new(0),
        });
        let producer = ProducerCore::new(
            broker.clone(),
            &settings(3),
            Duration::from_millis(1),
            Duration::from_millis(10),
        );

        let result = producer
            .publish(&CancellationToken::new(), "topic", None, &HashMap::new(), b"body")
            .await;
        assert!(result.is_ok());
        assert_eq!(*broker.attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_retries_then_succeeds() {
        let broker = Arc::new(FlakyBroker {
            failures_remaining: Mutex::new(2),
            attempts: Mutex::new(0),
        });
        let producer = ProducerCore::new(
            broker.clone(),
            &settings(5),
            Duration::from_millis(1),
            Duration::from_millis(10),
        );

        let result = producer
            .publish(&CancellationToken::new(), "topic", None, &HashMap::new(), b"body")
            .await;
        assert!(result.is_ok());
        assert_eq!(*broker.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_publish_exhausts_attempts() {
        let broker = Arc::new(FlakyBroker {
            failures_remaining: Mutex::new(10),
            attempts: Mutex::new(0),
        });
        let producer = ProducerCore::new(
            broker.clone(),
            &settings(3),
            Duration::from_millis(1),
            Duration::from_millis(10),
        );

        let result = producer
            .publish(&CancellationToken::new(), "topic", None, &HashMap::new(), b"body")
            .await;
        assert!(matches!(
            result,
            Err(ProducerError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(*broker.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_closed_producer_rejects_publish() {
        let broker = Arc::new(FlakyBroker {
            failures_remaining: Mutex::new(0),
            attempts: Mutex::new(0),
        });
        let producer = ProducerCore::new(
            broker,
            &settings(3),
            Duration::from_millis(1),
            Duration::from_millis(10),
        );
        producer.close().await.unwrap();
        // Second close is a no-op success.
        producer.close().await.unwrap();

        let result = producer
            .publish(&CancellationToken::new(), "topic", None, &HashMap::new(), b"body")
            .await;
        assert!(matches!(result, Err(ProducerError::ProducerClosed)));
    }
}
