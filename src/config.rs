//! Configuration surface for the streamforge runtime.
//!
//! Mirrors the "functional-options construction" idiom from the source
//! system as a validated builder: every [`Config`] is constructed through
//! [`ConfigBuilder::build`], which fails fast with a descriptive
//! [`ConfigError`] rather than accepting a half-valid configuration.

use std::time::Duration;

use log::debug;

/// Required-acknowledgement level for the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    None,
    Leader,
    #[default]
    All,
}

/// Compression codec used by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

/// Where the consumer should start reading from when no committed offset
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
    Explicit(i64),
}

/// Behavior when the DLQ is disabled and retries are exhausted.
///
/// `spec.md` leaves this as an explicit open question; this crate decides it
/// as a config switch defaulting to the historically normative behavior
/// (`Redeliver`). See `DESIGN.md` for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDlqDisabledExhaustion {
    #[default]
    Redeliver,
    Discard,
}

/// DLQ strategy selector. The concrete behavior lives in [`crate::dlq::DlqStrategy`];
/// this is the config-surface counterpart used to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DlqStrategyKind {
    #[default]
    PublishToTopic,
    LogOnly,
    Discard,
}

/// DLQ-related configuration (`dlq.*` in `spec.md` §3).
#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub enabled: bool,
    pub topic: String,
    pub strategy: DlqStrategyKind,
    pub service_name: String,
    pub environment: String,
    pub include_stack_trace: bool,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: String::new(),
            strategy: DlqStrategyKind::default(),
            service_name: "unknown-service".to_string(),
            environment: "development".to_string(),
            include_stack_trace: false,
        }
    }
}

/// Producer-related configuration (`producer.*` in `spec.md` §3).
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_attempts: u32,
    pub required_acks: RequiredAcks,
    pub compression: Compression,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(100),
            max_attempts: 3,
            required_acks: RequiredAcks::default(),
            compression: Compression::default(),
        }
    }
}

/// Consumer-related configuration (`consumer.*` in `spec.md` §3).
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub topics: Vec<String>,
    pub start_offset: StartOffset,
    pub commit_interval: Duration,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub max_wait: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            topics: Vec::new(),
            start_offset: StartOffset::default(),
            commit_interval: Duration::from_secs(5),
            min_bytes: 1,
            max_bytes: 1_048_576,
            max_wait: Duration::from_millis(500),
        }
    }
}

/// Top-level, validated configuration for the streamforge runtime.
///
/// Construct via [`ConfigBuilder`]; there is no public way to obtain a
/// `Config` that skips validation.
#[derive(Debug, Clone)]
pub struct Config {
    pub brokers: Vec<String>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub dlq: DlqConfig,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub error_channel_capacity: usize,
    pub shutdown_drain_deadline: Duration,
    pub on_dlq_disabled_exhaustion: OnDlqDisabledExhaustion,
}

/// Errors raised while validating a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one broker must be configured")]
    NoBrokers,
    #[error("maxRetries must be >= 0, got {0}")]
    NegativeMaxRetries(i64),
    #[error("duration {0} must be positive, got {1}")]
    InvalidDuration(&'static str, String),
    #[error("dlq.enabled is true but dlq.topic is empty")]
    MissingDlqTopic,
    #[error("errorChannelCapacity must be >= 1, got {0}")]
    InvalidErrorChannelCapacity(usize),
    #[error("consumer.groupID must not be empty")]
    MissingGroupId,
    #[error("consumer.topics must not be empty")]
    MissingConsumerTopics,
    #[error("env variable {0} error: {1}")]
    EnvVar(&'static str, std::env::VarError),
}

/// Builder for [`Config`]. Every field has a sensible default; `build()`
/// validates the assembled configuration and fails fast on the first
/// violated invariant.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    brokers: Vec<String>,
    max_retries: i64,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    dlq: DlqConfig,
    producer: ProducerSettings,
    consumer: ConsumerSettings,
    error_channel_capacity: usize,
    shutdown_drain_deadline: Duration,
    on_dlq_disabled_exhaustion: OnDlqDisabledExhaustion,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            brokers: Vec::new(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(30),
            dlq: DlqConfig::default(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
            error_channel_capacity: 100,
            shutdown_drain_deadline: Duration::from_secs(30),
            on_dlq_disabled_exhaustion: OnDlqDisabledExhaustion::default(),
        }
    }

    pub fn brokers(mut self, brokers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.brokers = brokers.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_retry_backoff(mut self, ceiling: Duration) -> Self {
        self.max_retry_backoff = ceiling;
        self
    }

    pub fn dlq(mut self, dlq: DlqConfig) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn producer(mut self, producer: ProducerSettings) -> Self {
        self.producer = producer;
        self
    }

    pub fn consumer(mut self, consumer: ConsumerSettings) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = capacity;
        self
    }

    pub fn shutdown_drain_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_drain_deadline = deadline;
        self
    }

    pub fn on_dlq_disabled_exhaustion(mut self, choice: OnDlqDisabledExhaustion) -> Self {
        self.on_dlq_disabled_exhaustion = choice;
        self
    }

    /// Validates the assembled configuration, returning a [`Config`] on
    /// success. Every duration must be strictly positive; `maxRetries` must
    /// be non-negative; a DLQ topic is required when the DLQ is enabled.
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.brokers.is_empty() {
            return Err(ConfigError::NoBrokers);
        }
        if self.max_retries < 0 {
            return Err(ConfigError::NegativeMaxRetries(self.max_retries));
        }
        check_positive("retryBackoff", self.retry_backoff)?;
        check_positive("maxRetryBackoff", self.max_retry_backoff)?;
        check_positive("shutdownDrainDeadline", self.shutdown_drain_deadline)?;
        check_positive("producer.batchTimeout", self.producer.batch_timeout)?;
        check_positive("consumer.commitInterval", self.consumer.commit_interval)?;
        check_positive("consumer.maxWait", self.consumer.max_wait)?;
        if self.dlq.enabled && self.dlq.topic.is_empty() {
            return Err(ConfigError::MissingDlqTopic);
        }
        if self.error_channel_capacity == 0 {
            return Err(ConfigError::InvalidErrorChannelCapacity(0));
        }
        if self.consumer.group_id.is_empty() {
            return Err(ConfigError::MissingGroupId);
        }
        if self.consumer.topics.is_empty() {
            return Err(ConfigError::MissingConsumerTopics);
        }

        debug!(
            "Validated config: brokers={:?}, maxRetries={}, dlq.enabled={}",
            self.brokers, self.max_retries, self.dlq.enabled
        );

        Ok(Config {
            brokers: self.brokers,
            max_retries: self.max_retries as u32,
            retry_backoff: self.retry_backoff,
            max_retry_backoff: self.max_retry_backoff,
            dlq: self.dlq,
            producer: self.producer,
            consumer: self.consumer,
            error_channel_capacity: self.error_channel_capacity,
            shutdown_drain_deadline: self.shutdown_drain_deadline,
            on_dlq_disabled_exhaustion: self.on_dlq_disabled_exhaustion,
        })
    }
}

fn check_positive(name: &'static str, d: Duration) -> Result<(), ConfigError> {
    if d.is_zero() {
        Err(ConfigError::InvalidDuration(name, format!("{:?}", d)))
    } else {
        Ok(())
    }
}

/// Reads `BROKERS` (comma-separated) from the environment and seeds a
/// [`ConfigBuilder`] with it, following the same fail-fast-on-missing-env-var
/// idiom as the teacher crate's `get_env_var`.
pub fn brokers_from_env() -> Result<Vec<String>, ConfigError> {
    let value = std::env::var("BROKERS").map_err(|e| ConfigError::EnvVar("BROKERS", e))?;
    Ok(value.split(',').map(str::trim).map(String::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigBuilder {
        ConfigBuilder::new()
            .brokers(["localhost:9092"])
            .consumer(ConsumerSettings {
                group_id: "group".to_string(),
                topics: vec!["topic".to_string()],
                ..ConsumerSettings::default()
            })
    }

    #[test]
    fn test_build_succeeds_with_defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.error_channel_capacity, 100);
    }

    #[test]
    fn test_no_brokers_rejected() {
        let result = ConfigBuilder::new().build();
        assert!(matches!(result, Err(ConfigError::NoBrokers)));
    }

    #[test]
    fn test_negative_max_retries_rejected() {
        let result = base().max_retries(-1).build();
        assert!(matches!(result, Err(ConfigError::NegativeMaxRetries(-1))));
    }

    #[test]
    fn test_zero_backoff_rejected() {
        let result = base().retry_backoff(Duration::ZERO).build();
        assert!(matches!(result, Err(ConfigError::InvalidDuration("retryBackoff", _))));
    }

    #[test]
    fn test_dlq_enabled_without_topic_rejected() {
        let result = base()
            .dlq(DlqConfig {
                enabled: true,
                ..DlqConfig::default()
            })
            .build();
        assert!(matches!(result, Err(ConfigError::MissingDlqTopic)));
    }

    #[test]
    fn test_zero_error_channel_capacity_rejected() {
        let result = base().error_channel_capacity(0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidErrorChannelCapacity(0))
        ));
    }
}
