//! A Kafka consumer/producer runtime toolkit: automatic retry with
//! exponential backoff, dead-letter-queue handoff, worker-pool dispatch with
//! panic isolation, and bounded backpressure on the error-reporting surface.
//!
//! The core (`runtime` feature) is broker-agnostic behind
//! [`broker::BrokerSession`]; [`broker::rdkafka_session`] provides a default
//! implementation backed by `rdkafka` behind the `rdkafka-broker` feature.
//! See `SPEC_FULL.md` for the full module-by-module specification and
//! `DESIGN.md` for how each part is grounded.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;

#[cfg(feature = "runtime")]
pub mod broker;
#[cfg(feature = "runtime")]
pub mod consumer;
#[cfg(feature = "runtime")]
pub mod dlq;
#[cfg(feature = "runtime")]
pub mod error_channel;
#[cfg(feature = "runtime")]
pub mod lifecycle;
#[cfg(feature = "runtime")]
pub mod producer;
#[cfg(feature = "runtime")]
pub mod registry;
#[cfg(feature = "runtime")]
pub mod retry;
#[cfg(feature = "runtime")]
pub mod retry_state;

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod admin;

pub use error::Error;

#[cfg(feature = "runtime")]
pub use broker::{AuthStrategy, BrokerError, BrokerSession, Message};
#[cfg(feature = "runtime")]
pub use consumer::{ConsumerCore, ConsumerError};
#[cfg(feature = "runtime")]
pub use dlq::{DlqError, DlqMessage, DlqStrategy};
#[cfg(feature = "runtime")]
pub use producer::{ProducerCore, ProducerError};
#[cfg(feature = "runtime")]
pub use registry::{Handler, HandlerContext, HandlerRegistry};

pub use config::{Config, ConfigBuilder, ConfigError};
