//! Bounded, non-blocking sink for asynchronous errors surfaced to the
//! consumer's owner via [`crate::consumer::ConsumerCore::errors`].
//!
//! `send_error` never blocks: a full channel drops the error and increments
//! an atomic counter instead. A background monitor (spawned by the consumer
//! alongside the fetch loop) periodically reports backlog size and warns,
//! rate-limited, when the channel nears capacity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;

/// A type-erased error surfaced through the channel; callers don't need to
/// know the originating module's concrete error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
const WARNING_RATE_LIMIT: Duration = Duration::from_secs(10);
const NEAR_CAPACITY_FRACTION: f64 = 0.8;

/// Bounded MPSC error sink with drop accounting.
///
/// The receiving half is handed out exactly once via [`take_receiver`](Self::take_receiver);
/// `errors()` on the consumer is a single, non-restartable receive channel
/// closed on shutdown.
pub struct ErrorChannel {
    tx: mpsc::Sender<BoxError>,
    rx: Mutex<Option<mpsc::Receiver<BoxError>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ErrorChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Strictly non-blocking: a full channel drops `err` and bumps the
    /// counter. Completes in O(1) regardless of whether anything is reading.
    pub fn send_error(&self, err: BoxError) {
        if self.tx.try_send(err).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes the receiving half. Returns `None` if already taken — the
    /// surface is a single receive channel, not restartable.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<BoxError>> {
        self.rx.lock().expect("error channel poisoned").take()
    }

    fn len(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    /// Runs until `shutdown` fires, then logs a single summary warning if any
    /// errors were dropped. Intended to be spawned alongside the fetch loop.
    pub async fn run_monitor(&self, shutdown: Shutdown) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        interval.tick().await; // first tick fires immediately
        let mut last_warning: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let len = self.len();
                    if len as f64 >= NEAR_CAPACITY_FRACTION * self.capacity as f64 {
                        let now = Instant::now();
                        let should_warn = last_warning
                            .map(|t| now.duration_since(t) >= WARNING_RATE_LIMIT)
                            .unwrap_or(true);
                        if should_warn {
                            warn!("error channel approaching capacity: {}/{}", len, self.capacity);
                            last_warning = Some(now);
                        }
                    } else if len > 0 {
                        debug!("error channel backlog: {}/{}", len, self.capacity);
                    }
                }
            }
        }

        let dropped = self.dropped();
        if dropped > 0 {
            warn!("error channel closed with {} errors dropped", dropped);
        }
    }
}
