//! Fetch loop, worker pool, and per-message orchestration: registry lookup,
//! retry loop, DLQ handoff, and the commit-after-DLQ-success ordering that is
//! this crate's central correctness property.
//!
//! Grounded in the teacher crate's `utils::dlq::Dlq::run` fetch-loop shape,
//! combined with a worker-pool/backpressure pattern for the throughput path.

mod error;

pub use error::ConsumerError;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, BrokerSession, Message};
use crate::config::{Config, OnDlqDisabledExhaustion};
use crate::dlq::{build_dlq_message, DlqStrategy};
use crate::error_channel::ErrorChannel;
use crate::lifecycle::Shutdown;
use crate::registry::{Handler, HandlerContext, HandlerRegistry};
use crate::retry::{format_duration, RetryPolicy, RetryRecord, RetryState};
use crate::retry_state::{message_key, RetryStateTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Created,
    Running,
    Closing,
    Closed,
}

/// Fetch loop, worker pool, and per-message orchestration.
///
/// Owns the `BrokerSession` reader, [`HandlerRegistry`], [`RetryStateTable`],
/// [`ErrorChannel`] and shutdown coordinator. The [`DlqStrategy`] (if any)
/// holds its own `Arc<ProducerCore>`, closed independently by its owner.
///
/// State machine: `Created -> Running -> Closing -> Closed`. `close()` on an
/// already-`Closed` instance is a no-op success.
pub struct ConsumerCore {
    config: Config,
    broker: Arc<dyn BrokerSession>,
    registry: HandlerRegistry,
    retry_table: RetryStateTable,
    error_channel: ErrorChannel,
    dlq_strategy: Option<DlqStrategy>,
    cancel_token: CancellationToken,
    shutdown: Mutex<Option<Shutdown>>,
    state: Mutex<ConsumerState>,
}

impl ConsumerCore {
    /// `dlq_strategy` must be `Some` when `config.dlq.enabled`; construction
    /// fails fast otherwise.
    pub fn new(
        config: Config,
        broker: Arc<dyn BrokerSession>,
        dlq_strategy: Option<DlqStrategy>,
    ) -> Result<Arc<Self>, ConsumerError> {
        if config.dlq.enabled && dlq_strategy.is_none() {
            return Err(ConsumerError::MissingDlqStrategy);
        }

        let shutdown = Shutdown::new();
        let cancel_token = shutdown.token();
        let error_channel = ErrorChannel::new(config.error_channel_capacity);

        let core = Arc::new(Self {
            config,
            broker,
            registry: HandlerRegistry::new(),
            retry_table: RetryStateTable::new(),
            error_channel,
            dlq_strategy,
            cancel_token,
            shutdown: Mutex::new(Some(shutdown)),
            state: Mutex::new(ConsumerState::Created),
        });

        // The monitor runs for the lifetime of the consumer, independent of
        // whether `consume`/`consume_with_worker_pool` has been called yet.
        let monitor_shutdown = core
            .clone_shutdown()
            .expect("shutdown handle just constructed");
        let monitor_core = Arc::clone(&core);
        tokio::spawn(async move {
            monitor_core.error_channel.run_monitor(monitor_shutdown).await;
        });

        Ok(core)
    }

    pub fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.register(event_type, handler);
    }

    /// The bounded error surface. A single, non-restartable receive channel;
    /// returns `None` if already taken.
    pub fn errors(&self) -> Option<mpsc::Receiver<crate::error_channel::BoxError>> {
        self.error_channel.take_receiver()
    }

    /// Number of messages currently mid-retry. Exposed for tests and metrics.
    pub fn in_flight_retries(&self) -> usize {
        self.retry_table.len()
    }

    fn clone_shutdown(&self) -> Result<Shutdown, ConsumerError> {
        self.shutdown
            .lock()
            .expect("shutdown handle poisoned")
            .as_ref()
            .cloned()
            .ok_or(ConsumerError::ConsumerClosed)
    }

    fn transition_to_running(&self) -> Result<(), ConsumerError> {
        let mut state = self.state.lock().expect("consumer state poisoned");
        match *state {
            ConsumerState::Closing | ConsumerState::Closed => Err(ConsumerError::ConsumerClosed),
            _ => {
                *state = ConsumerState::Running;
                Ok(())
            }
        }
    }

    /// Starts the single-consumer fetch loop in the background; returns
    /// immediately. Preserves per-partition delivery order — there is no
    /// worker pool on this path.
    pub fn consume(self: &Arc<Self>) -> Result<(), ConsumerError> {
        self.transition_to_running()?;
        let shutdown = self.clone_shutdown()?;
        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.run_single_path(shutdown).await;
        });
        Ok(())
    }

    /// Starts one fetcher and `n` workers, draining a bounded channel of
    /// capacity `2n`. Returns once the fetcher and every worker have
    /// finished, or as soon as the consumer is cancelled — whichever comes
    /// first; cancelled tasks keep draining in the background until
    /// [`close`](Self::close) waits for them.
    ///
    /// Per-partition ordering is *not* preserved here; callers that need it
    /// should use [`consume`](Self::consume) or run with `n == 1`.
    // TODO: route messages by `partition % n` to the worker channel to
    // restore per-partition ordering at a throughput cost, per the deferred
    // design note in DESIGN.md.
    pub async fn consume_with_worker_pool(self: &Arc<Self>, n: usize) -> Result<(), ConsumerError> {
        self.transition_to_running()?;
        let n = n.max(1);
        let (tx, rx) = mpsc::channel::<Message>(2 * n);
        let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));

        let fetcher_shutdown = self.clone_shutdown()?;
        let fetcher = {
            let core = Arc::clone(self);
            tokio::spawn(async move { core.fetch_loop(tx, fetcher_shutdown).await })
        };

        let mut workers = Vec::with_capacity(n);
        for _ in 0..n {
            let core = Arc::clone(self);
            let rx = Arc::clone(&shared_rx);
            let worker_shutdown = self.clone_shutdown()?;
            workers.push(tokio::spawn(async move {
                core.worker_loop(rx, worker_shutdown).await;
            }));
        }

        let join_all = async {
            let _ = fetcher.await;
            for w in workers {
                let _ = w.await;
            }
        };

        tokio::select! {
            _ = self.cancel_token.cancelled() => Err(ConsumerError::Cancelled),
            _ = join_all => Ok(()),
        }
    }

    /// Idempotent: shuts down workers, drains with `shutdownDrainDeadline`,
    /// closes the error channel, releases the broker session. A second call
    /// after a successful close is a no-op success.
    ///
    /// Per `spec.md` §7, a drain timeout or a broker close failure is
    /// returned to the caller rather than only logged — the consumer still
    /// transitions to `Closed` either way, since there is no way back from a
    /// cancelled, half-drained state.
    pub async fn close(&self) -> Result<(), ConsumerError> {
        {
            let mut state = self.state.lock().expect("consumer state poisoned");
            if *state == ConsumerState::Closed {
                return Ok(());
            }
            *state = ConsumerState::Closing;
        }

        self.cancel_token.cancel();

        let shutdown = self
            .shutdown
            .lock()
            .expect("shutdown handle poisoned")
            .take();
        let deadline = self.config.shutdown_drain_deadline;
        let mut drain_timed_out = false;
        if let Some(shutdown) = shutdown {
            if tokio::time::timeout(deadline, shutdown.complete())
                .await
                .is_err()
            {
                warn!(
                    "shutdown drain deadline ({:?}) exceeded; closing anyway",
                    deadline
                );
                drain_timed_out = true;
            }
        }

        let broker_close_result = self.broker.close().await;
        if let Err(e) = &broker_close_result {
            error!("broker close failed during consumer shutdown: {}", e);
        }

        *self.state.lock().expect("consumer state poisoned") = ConsumerState::Closed;

        if drain_timed_out {
            return Err(ConsumerError::DrainTimeout(deadline));
        }
        broker_close_result.map_err(ConsumerError::CloseFailed)
    }

    async fn run_single_path(self: Arc<Self>, _shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                result = self.broker.fetch(&self.cancel_token) => {
                    match result {
                        Ok(message) => self.dispatch(message, &self.cancel_token).await,
                        Err(BrokerError::Cancelled) => break,
                        Err(e) => {
                            error!("fetch failed: {}", e);
                            self.error_channel.send_error(Box::new(ConsumerError::ConsumeFailed(e)));
                        }
                    }
                }
            }
        }
    }

    async fn fetch_loop(self: Arc<Self>, tx: mpsc::Sender<Message>, _shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                result = self.broker.fetch(&self.cancel_token) => {
                    match result {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(BrokerError::Cancelled) => break,
                        Err(e) => {
                            error!("fetch failed: {}", e);
                            self.error_channel.send_error(Box::new(ConsumerError::ConsumeFailed(e)));
                        }
                    }
                }
            }
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
        _shutdown: Shutdown,
    ) {
        loop {
            let next = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            match next {
                Some(message) => Arc::clone(&self).process_with_panic_isolation(message).await,
                None => break,
            }
        }
    }

    /// Runs `dispatch` on a dedicated task so a handler panic is recovered
    /// per message rather than killing the worker.
    async fn process_with_panic_isolation(self: Arc<Self>, message: Message) {
        let message_for_panic = message.clone();
        let ctx = self.cancel_token.clone();
        let core = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            core.dispatch(message, &ctx).await;
        });

        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                let panic_msg = panic_payload_to_string(join_err.into_panic());
                error!(
                    "handler panicked: topic={} partition={} offset={} panic={}",
                    message_for_panic.topic,
                    message_for_panic.partition,
                    message_for_panic.offset,
                    panic_msg
                );
                self.handle_panic(message_for_panic, panic_msg).await;
            } else {
                error!("worker task ended unexpectedly: {:?}", join_err);
            }
        }
    }

    /// Dispatch algorithm for a single message, per `spec.md` §4.6.
    async fn dispatch(&self, message: Message, ctx: &CancellationToken) {
        let event_type = message.event_type().to_string();
        let handlers = self.registry.handlers_for(&event_type);

        if handlers.is_empty() {
            warn!(
                "no handler registered for event_type={:?}: topic={} partition={} offset={}",
                event_type, message.topic, message.partition, message.offset
            );
            self.error_channel
                .send_error(Box::new(ConsumerError::NoHandler(event_type)));
            return;
        }

        if self.config.dlq.enabled {
            for handler in handlers {
                self.dispatch_with_retry(handler, &message, ctx).await;
            }
        } else {
            self.dispatch_without_retry(&handlers, &message, ctx).await;
        }
    }

    /// DLQ disabled: a single pass over every handler, all-or-nothing commit.
    /// `onDlqDisabledExhaustion` decides whether a failure still commits
    /// (`Discard`) or leaves the message uncommitted for redelivery
    /// (`Redeliver`, the default).
    async fn dispatch_without_retry(
        &self,
        handlers: &[Arc<dyn Handler>],
        message: &Message,
        ctx: &CancellationToken,
    ) {
        let handler_ctx = HandlerContext::new(ctx.clone());
        let body = message.value.clone().unwrap_or_default();
        let mut all_succeeded = true;

        for handler in handlers {
            if let Err(e) = handler.handle(&handler_ctx, &message.headers, &body).await {
                all_succeeded = false;
                warn!(
                    "handler failed (dlq disabled): topic={} partition={} offset={} error={}",
                    message.topic, message.partition, message.offset, e
                );
                self.error_channel.send_error(e);
            }
        }

        let should_commit = all_succeeded
            || self.config.on_dlq_disabled_exhaustion == OnDlqDisabledExhaustion::Discard;

        if !should_commit {
            error!(
                "CRITICAL: dlq disabled and a handler failed; message will be redelivered: topic={} partition={} offset={}",
                message.topic, message.partition, message.offset
            );
            return;
        }
        if !all_succeeded {
            error!(
                "CRITICAL: committing offset despite handler failure (onDlqDisabledExhaustion=discard): topic={} partition={} offset={}",
                message.topic, message.partition, message.offset
            );
        }

        if let Err(e) = self.broker.commit(ctx, message).await {
            error!(
                "commit failed: topic={} partition={} offset={} error={}",
                message.topic, message.partition, message.offset, e
            );
            self.error_channel.send_error(Box::new(e));
        } else {
            #[cfg(feature = "metrics")]
            crate::metrics::MESSAGES_PROCESSED.inc();
        }
    }

    /// DLQ enabled: an independent retry loop per handler. `maxRetries`
    /// extra attempts beyond the first; backoff doubles per
    /// [`RetryPolicy::next`], capped at `maxRetryBackoff`.
    async fn dispatch_with_retry(
        &self,
        handler: Arc<dyn Handler>,
        message: &Message,
        ctx: &CancellationToken,
    ) {
        let key = message_key(&message.topic, message.partition, message.offset);
        let state_arc = self.retry_table.get_or_create(&key);
        let handler_ctx = HandlerContext::new(ctx.clone());
        let body = message.value.clone().unwrap_or_default();

        let total_attempts = self.config.max_retries + 1;
        let mut backoff = self.config.retry_backoff;

        for attempt in 0..total_attempts {
            if ctx.is_cancelled() {
                return;
            }

            match handler.handle(&handler_ctx, &message.headers, &body).await {
                Ok(()) => {
                    if let Err(e) = self.broker.commit(ctx, message).await {
                        error!(
                            "commit failed after handler success: topic={} partition={} offset={} error={}",
                            message.topic, message.partition, message.offset, e
                        );
                        self.error_channel.send_error(Box::new(e));
                    } else {
                        self.retry_table.delete(&key);
                        #[cfg(feature = "metrics")]
                        crate::metrics::MESSAGES_PROCESSED.inc();
                    }
                    return;
                }
                Err(e) => {
                    let is_last = attempt + 1 == total_attempts;
                    {
                        let mut state = state_arc.lock().expect("retry state poisoned");
                        state.record_attempt(e.to_string(), backoff);
                    }
                    warn!(
                        "handler attempt failed: topic={} partition={} offset={} attempt={} maxAttempts={} error={} backoff={}",
                        message.topic, message.partition, message.offset, attempt + 1, total_attempts, e, format_duration(backoff)
                    );
                    self.error_channel.send_error(e);
                    #[cfg(feature = "metrics")]
                    crate::metrics::MESSAGES_RETRIED.inc();

                    if is_last {
                        break;
                    }
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = RetryPolicy::next(backoff, self.config.max_retry_backoff);
                }
            }
        }

        self.handle_exhaustion(&key, &state_arc, message, ctx).await;
    }

    /// All attempts exhausted: hand off to the DLQ strategy. Commit follows
    /// *only* if the DLQ accepts — the central correctness property.
    async fn handle_exhaustion(
        &self,
        key: &str,
        state_arc: &Arc<std::sync::Mutex<RetryState>>,
        message: &Message,
        ctx: &CancellationToken,
    ) {
        let (attempts, history) = {
            let state = state_arc.lock().expect("retry state poisoned");
            (state.attempts, state.history.clone())
        };
        let last_error = history.last().map(|r| r.error.clone()).unwrap_or_default();

        let Some(strategy) = &self.dlq_strategy else {
            return;
        };

        let dlq_message = build_dlq_message(
            message,
            last_error,
            "HandlerError",
            attempts,
            attempts,
            self.config.consumer.group_id.as_str(),
            &history,
            &self.config.dlq,
        );

        match strategy.handle_failure(ctx, &dlq_message).await {
            Ok(()) => {
                if let Err(e) = self.broker.commit(ctx, message).await {
                    error!(
                        "commit failed after DLQ acceptance: topic={} partition={} offset={} error={}",
                        message.topic, message.partition, message.offset, e
                    );
                    self.error_channel.send_error(Box::new(e));
                } else {
                    self.retry_table.delete(key);
                }
                #[cfg(feature = "metrics")]
                crate::metrics::DLQ_PUBLISHED.inc();
            }
            Err(e) => {
                error!(
                    "CRITICAL: DLQ handling failed, message will be redelivered: topic={} partition={} offset={} error={}",
                    message.topic, message.partition, message.offset, e
                );
                self.error_channel.send_error(Box::new(e));
                #[cfg(feature = "metrics")]
                crate::metrics::DLQ_FAILED.inc();
            }
        }
    }

    /// Synthesizes a DLQ record for a recovered handler panic: a single
    /// `RetryRecord` tagged `"PANIC: <value>"`, attempt count pinned to
    /// `maxRetries` to mark exhaustion outright.
    async fn handle_panic(&self, message: Message, panic_msg: String) {
        #[cfg(feature = "metrics")]
        crate::metrics::HANDLER_PANICS.inc();

        if !self.config.dlq.enabled {
            error!(
                "CRITICAL: handler panicked and dlq is disabled; message will be redelivered: topic={} partition={} offset={} panic={}",
                message.topic, message.partition, message.offset, panic_msg
            );
            return;
        }
        let Some(strategy) = &self.dlq_strategy else {
            return;
        };

        // The same key `dispatch_with_retry` would have created via
        // `retry_table.get_or_create` for this message — cleared here since a
        // panic unwinds past the normal success/exhaustion deletion points.
        let key = message_key(&message.topic, message.partition, message.offset);

        let attempts = self.config.max_retries.max(1);
        let history = vec![RetryRecord {
            attempt: attempts,
            timestamp: chrono::Utc::now(),
            error: format!("PANIC: {}", panic_msg),
            backoff: format_duration(Duration::ZERO),
        }];
        let dlq_message = build_dlq_message(
            &message,
            format!("PANIC: {}", panic_msg),
            "Panic",
            attempts,
            attempts,
            self.config.consumer.group_id.as_str(),
            &history,
            &self.config.dlq,
        );

        match strategy.handle_failure(&self.cancel_token, &dlq_message).await {
            Ok(()) => {
                if let Err(e) = self.broker.commit(&self.cancel_token, &message).await {
                    error!("commit failed after panic DLQ acceptance: {}", e);
                } else {
                    self.retry_table.delete(&key);
                }
                #[cfg(feature = "metrics")]
                crate::metrics::DLQ_PUBLISHED.inc();
            }
            Err(e) => {
                error!(
                    "CRITICAL: DLQ handling after panic failed, message will be redelivered: {}",
                    e
                );
                #[cfg(feature = "metrics")]
                crate::metrics::DLQ_FAILED.inc();
            }
        }
    }
}

fn panic_payload_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::Notify;

    use crate::config::{ConsumerSettings, DlqConfig};
    use crate::producer::ProducerCore;

    struct InMemoryBroker {
        queue: tokio::sync::Mutex<VecDeque<Message>>,
        notify: Notify,
        commits: Mutex<Vec<(i32, i64)>>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail_publish_times: Mutex<u32>,
    }

    impl InMemoryBroker {
        fn new() -> Self {
            Self {
                queue: tokio::sync::Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                commits: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                fail_publish_times: Mutex::new(0),
            }
        }

        async fn push(&self, message: Message) {
            self.queue.lock().await.push_back(message);
            self.notify.notify_one();
        }
    }

    #[async_trait]
    impl BrokerSession for InMemoryBroker {
        async fn fetch(&self, ctx: &CancellationToken) -> Result<Message, BrokerError> {
            loop {
                if let Some(message) = self.queue.lock().await.pop_front() {
                    return Ok(message);
                }
                tokio::select! {
                    _ = ctx.cancelled() => return Err(BrokerError::Cancelled),
                    _ = self.notify.notified() => {}
                }
            }
        }

        async fn commit(&self, _ctx: &CancellationToken, message: &Message) -> Result<(), BrokerError> {
            self.commits.lock().unwrap().push((message.partition, message.offset));
            Ok(())
        }

        async fn publish(
            &self,
            _ctx: &CancellationToken,
            topic: &str,
            _key: Option<&[u8]>,
            _headers: &HashMap<String, String>,
            body: &[u8],
        ) -> Result<(), BrokerError> {
            let mut remaining = self.fail_publish_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrokerError::Other("dlq publish failed".to_string()));
            }
            self.published.lock().unwrap().push((topic.to_string(), body.to_vec()));
            Ok(())
        }

        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn sample_message(event_type: &str, offset: i64) -> Message {
        let mut headers = HashMap::new();
        headers.insert("event_type".to_string(), event_type.to_string());
        Message {
            topic: "orders".to_string(),
            partition: 0,
            offset,
            key: Some(b"order-1".to_vec()),
            value: Some(b"{\"id\":1}".to_vec()),
            headers,
            timestamp: chrono::Utc::now(),
        }
    }

    fn base_config() -> Config {
        crate::config::ConfigBuilder::new()
            .brokers(["localhost:9092"])
            .consumer(ConsumerSettings {
                group_id: "order-consumers".to_string(),
                topics: vec!["orders".to_string()],
                ..ConsumerSettings::default()
            })
            .retry_backoff(StdDuration::from_millis(5))
            .max_retry_backoff(StdDuration::from_millis(40))
            .shutdown_drain_deadline(StdDuration::from_secs(2))
            .build()
            .unwrap()
    }

    async fn wait_until<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    // S1 — happy path, single handler, DLQ off.
    #[tokio::test]
    async fn test_happy_path_single_handler_dlq_off() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = base_config();
        let consumer = ConsumerCore::new(config, broker.clone(), None).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        consumer.register_handler(
            "order.created",
            Arc::new(move |_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        broker.push(sample_message("order.created", 1)).await;
        consumer.consume().unwrap();

        wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
        wait_until(|| broker.commits.lock().unwrap().len() == 1).await;
        assert!(broker.published.lock().unwrap().is_empty());

        consumer.close().await.unwrap();
    }

    // S2 (adapted) — exponential schedule, DLQ on, exhausts to DLQ then commits.
    #[tokio::test]
    async fn test_retry_schedule_then_dlq_publish_and_commit() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Arc::new(ProducerCore::new(
            broker.clone(),
            &crate::config::ProducerSettings::default(),
            StdDuration::from_millis(5),
            StdDuration::from_millis(40),
        ));
        let strategy = DlqStrategy::PublishToTopic {
            producer,
            topic: "orders.dlq".to_string(),
        };

        let mut config = base_config();
        config.dlq = DlqConfig {
            enabled: true,
            topic: "orders.dlq".to_string(),
            ..DlqConfig::default()
        };
        config.max_retries = 3;

        let consumer = ConsumerCore::new(config, broker.clone(), Some(strategy)).unwrap();
        consumer.register_handler(
            "order.created",
            Arc::new(|_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| async {
                Err("boom".into())
            }),
        );

        broker.push(sample_message("order.created", 7)).await;
        consumer.consume().unwrap();

        wait_until(|| !broker.published.lock().unwrap().is_empty()).await;
        wait_until(|| broker.commits.lock().unwrap().len() == 1).await;
        assert_eq!(consumer.in_flight_retries(), 0);

        consumer.close().await.unwrap();
    }

    // S3 (adapted) — DLQ publish fails: no commit, state retained.
    #[tokio::test]
    async fn test_dlq_publish_failure_prevents_commit() {
        let broker = Arc::new(InMemoryBroker::new());
        *broker.fail_publish_times.lock().unwrap() = 1;
        let producer = Arc::new(ProducerCore::new(
            broker.clone(),
            &crate::config::ProducerSettings { max_attempts: 1, ..Default::default() },
            StdDuration::from_millis(5),
            StdDuration::from_millis(40),
        ));
        let strategy = DlqStrategy::PublishToTopic {
            producer,
            topic: "orders.dlq".to_string(),
        };

        let mut config = base_config();
        config.dlq = DlqConfig {
            enabled: true,
            topic: "orders.dlq".to_string(),
            ..DlqConfig::default()
        };
        config.max_retries = 0;

        let consumer = ConsumerCore::new(config, broker.clone(), Some(strategy)).unwrap();
        consumer.register_handler(
            "order.created",
            Arc::new(|_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| async {
                Err("boom".into())
            }),
        );

        broker.push(sample_message("order.created", 9)).await;
        consumer.consume().unwrap();

        wait_until(|| consumer.in_flight_retries() > 0 || !broker.commits.lock().unwrap().is_empty()).await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(broker.commits.lock().unwrap().is_empty());
        assert_eq!(consumer.in_flight_retries(), 1);

        consumer.close().await.unwrap();
    }

    // Boundary: maxRetries == 0, DLQ on — handler runs exactly once, then DLQ.
    #[tokio::test]
    async fn test_max_retries_zero_goes_straight_to_dlq() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Arc::new(ProducerCore::new(
            broker.clone(),
            &crate::config::ProducerSettings::default(),
            StdDuration::from_millis(5),
            StdDuration::from_millis(40),
        ));
        let strategy = DlqStrategy::PublishToTopic {
            producer,
            topic: "orders.dlq".to_string(),
        };

        let mut config = base_config();
        config.dlq = DlqConfig { enabled: true, topic: "orders.dlq".to_string(), ..DlqConfig::default() };
        config.max_retries = 0;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let consumer = ConsumerCore::new(config, broker.clone(), Some(strategy)).unwrap();
        consumer.register_handler(
            "order.created",
            Arc::new(move |_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("boom".into())
                }
            }),
        );

        broker.push(sample_message("order.created", 3)).await;
        consumer.consume().unwrap();

        wait_until(|| broker.commits.lock().unwrap().len() == 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        consumer.close().await.unwrap();
    }

    // Boundary: empty/unknown event type with no registered handler.
    #[tokio::test]
    async fn test_no_handler_does_not_commit() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = base_config();
        let consumer = ConsumerCore::new(config, broker.clone(), None).unwrap();
        let mut errors = consumer.errors().unwrap();

        broker.push(sample_message("unregistered.event", 5)).await;
        consumer.consume().unwrap();

        let err = tokio::time::timeout(StdDuration::from_secs(1), errors.recv())
            .await
            .expect("expected a NoHandler error")
            .unwrap();
        assert!(err.to_string().contains("no handler"));
        assert!(broker.commits.lock().unwrap().is_empty());

        consumer.close().await.unwrap();
    }

    // S4 (adapted) — handler panic, DLQ on, worker pool path.
    #[tokio::test]
    async fn test_handler_panic_is_isolated_and_routed_to_dlq() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Arc::new(ProducerCore::new(
            broker.clone(),
            &crate::config::ProducerSettings::default(),
            StdDuration::from_millis(5),
            StdDuration::from_millis(40),
        ));
        let strategy = DlqStrategy::PublishToTopic {
            producer,
            topic: "orders.dlq".to_string(),
        };

        let mut config = base_config();
        config.dlq = DlqConfig { enabled: true, topic: "orders.dlq".to_string(), ..DlqConfig::default() };
        config.max_retries = 1;

        let consumer = ConsumerCore::new(config, broker.clone(), Some(strategy)).unwrap();
        consumer.register_handler(
            "order.created",
            Arc::new(|_ctx: HandlerContext, _h: HashMap<String, String>, _b: Vec<u8>| async {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok(())
            }),
        );

        broker.push(sample_message("order.created", 11)).await;
        consumer.consume_with_worker_pool(2).await.unwrap();

        assert!(!broker.published.lock().unwrap().is_empty());
        assert_eq!(broker.commits.lock().unwrap().len(), 1);
        assert_eq!(consumer.in_flight_retries(), 0);

        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = ConsumerCore::new(base_config(), broker, None).unwrap();
        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_construction_rejects_dlq_enabled_without_strategy() {
        let mut config = base_config();
        config.dlq = DlqConfig { enabled: true, topic: "orders.dlq".to_string(), ..DlqConfig::default() };
        let broker = Arc::new(InMemoryBroker::new());
        let result = ConsumerCore::new(config, broker, None);
        assert!(matches!(result, Err(ConsumerError::MissingDlqStrategy)));
    }
}
