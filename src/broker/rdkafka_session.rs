//! Default [`BrokerSession`] backed by a real Kafka cluster via `rdkafka`.
//!
//! Generalizes the teacher crate's `protocol_adapters::kafka_protocol`
//! `ClientConfig` builders (which hard-code DSH's certificate bootstrap) into
//! a plain [`AuthStrategy`]-driven builder with no DSH-specific assumptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;

use super::{AuthStrategy, BrokerError, BrokerSession, Message};
use crate::config::Config;

impl From<KafkaError> for BrokerError {
    fn from(e: KafkaError) -> Self {
        BrokerError::Other(e.to_string())
    }
}

/// Applies `auth` to a Kafka `ClientConfig`, mirroring the teacher's
/// `set_dsh_certificates` but driven by an explicit strategy instead of an
/// implicit DSH bootstrap.
fn apply_auth_strategy(client_config: &mut ClientConfig, auth: &AuthStrategy) {
    match auth {
        AuthStrategy::PlainText => {
            client_config.set("security.protocol", "plaintext");
        }
        AuthStrategy::Tls {
            ca_pem,
            cert_pem,
            key_pem,
        } => {
            client_config
                .set("security.protocol", "ssl")
                .set("ssl.ca.pem", ca_pem)
                .set("ssl.certificate.pem", cert_pem)
                .set("ssl.key.pem", key_pem);
        }
        AuthStrategy::SaslPlain { username, password } => {
            client_config
                .set("security.protocol", "sasl_ssl")
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
    }
}

/// A [`BrokerSession`] backed by an `rdkafka` `StreamConsumer` +
/// `FutureProducer` pair.
pub struct RdKafkaBrokerSession {
    consumer: StreamConsumer,
    producer: FutureProducer,
    closed: AtomicBool,
}

impl RdKafkaBrokerSession {
    /// Builds and connects consumer + producer clients from `config` and
    /// `auth`. Fails fast with [`BrokerError::InvalidBrokers`] when no
    /// brokers are configured (should already be rejected at
    /// [`Config`] construction, checked again here for defense against a
    /// hand-built `Config`-like value).
    pub fn connect(config: &Config, auth: &AuthStrategy) -> Result<Self, BrokerError> {
        if config.brokers.is_empty() {
            return Err(BrokerError::InvalidBrokers(
                "no brokers configured".to_string(),
            ));
        }
        let brokers = config.brokers.join(",");

        let mut consumer_config = ClientConfig::new();
        consumer_config
            .set("bootstrap.servers", &brokers)
            .set("group.id", &config.consumer.group_id)
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                match config.consumer.start_offset {
                    crate::config::StartOffset::Earliest => "earliest",
                    crate::config::StartOffset::Latest => "latest",
                    crate::config::StartOffset::Explicit(_) => "earliest",
                },
            )
            .set(
                "fetch.wait.max.ms",
                config.consumer.max_wait.as_millis().to_string(),
            )
            .set("fetch.min.bytes", config.consumer.min_bytes.to_string())
            .set(
                "fetch.message.max.bytes",
                config.consumer.max_bytes.to_string(),
            );
        apply_auth_strategy(&mut consumer_config, auth);
        debug!("Kafka consumer config: {:#?}", consumer_config);
        let consumer: StreamConsumer = consumer_config
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        consumer
            .subscribe(
                &config
                    .consumer
                    .topics
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>(),
            )
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set(
                "acks",
                match config.producer.required_acks {
                    crate::config::RequiredAcks::None => "0",
                    crate::config::RequiredAcks::Leader => "1",
                    crate::config::RequiredAcks::All => "all",
                },
            )
            .set(
                "compression.type",
                match config.producer.compression {
                    crate::config::Compression::None => "none",
                    crate::config::Compression::Gzip => "gzip",
                    crate::config::Compression::Snappy => "snappy",
                    crate::config::Compression::Lz4 => "lz4",
                    crate::config::Compression::Zstd => "zstd",
                },
            )
            .set(
                "batch.num.messages",
                config.producer.batch_size.to_string(),
            )
            .set(
                "queue.buffering.max.ms",
                config.producer.batch_timeout.as_millis().to_string(),
            );
        apply_auth_strategy(&mut producer_config, auth);
        debug!("Kafka producer config: {:#?}", producer_config);
        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            consumer,
            producer,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrokerSession for RdKafkaBrokerSession {
    async fn fetch(&self, ctx: &CancellationToken) -> Result<Message, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ClientClosed);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(BrokerError::Cancelled),
            result = self.consumer.recv() => {
                let borrowed = result?;
                let mut headers = HashMap::new();
                if let Some(kafka_headers) = borrowed.headers() {
                    for header in kafka_headers.iter() {
                        let value = header
                            .value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        headers.insert(header.key.to_string(), value);
                    }
                }
                Ok(Message {
                    topic: borrowed.topic().to_string(),
                    partition: borrowed.partition(),
                    offset: borrowed.offset(),
                    key: borrowed.key().map(|k| k.to_vec()),
                    value: borrowed.payload().map(|v| v.to_vec()),
                    headers,
                    timestamp: borrowed
                        .timestamp()
                        .to_millis()
                        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                        .unwrap_or_else(chrono::Utc::now),
                })
            }
        }
    }

    async fn commit(&self, _ctx: &CancellationToken, message: &Message) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ClientClosed);
        }
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| BrokerError::Other(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(BrokerError::from)
    }

    async fn publish(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        key: Option<&[u8]>,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ClientClosed);
        }
        let mut owned_headers = OwnedHeaders::new_with_capacity(headers.len());
        for (k, v) in headers {
            owned_headers = owned_headers.insert(Header {
                key: k,
                value: Some(v.as_bytes()),
            });
        }
        let mut record = FutureRecord::to(topic).payload(body).headers(owned_headers);
        if let Some(key) = key {
            record = record.key(key);
        }

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(BrokerError::Cancelled),
            result = self.producer.send(record, Duration::from_secs(30)) => {
                match result {
                    Ok(_) => Ok(()),
                    Err((e, _)) => Err(BrokerError::from(e)),
                }
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("RdKafkaBrokerSession::close called more than once; ignoring");
            return Ok(());
        }
        Ok(())
    }
}
