//! Dead-letter queue: enriched failure records and the strategies that
//! dispose of them.
//!
//! This is the consumer core's last chance for a message whose retries are
//! exhausted. Generalizes the teacher crate's `utils::dlq` (a single
//! publish-to-topic strategy) into the tagged-variant strategy described in
//! `SPEC_FULL.md` §4.3.

mod error;
mod message;
mod strategy;

pub use error::DlqError;
pub use message::{build_dlq_message, DlqMessage};
pub use strategy::{CustomDlqHandler, DlqStrategy};
