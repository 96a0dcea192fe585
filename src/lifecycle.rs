//! Start/stop coordination for [`crate::consumer::ConsumerCore`]: a one-shot
//! shutdown signal plus a completion channel so an owner can wait for every
//! spawned task to actually finish.
//!
//! Adapted from the source toolkit's own graceful-shutdown handle: a cloned
//! [`Shutdown`] lets any task observe cancellation via [`Shutdown::recv`],
//! while the original retains the completion receiver for [`Shutdown::complete`].

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A handle that facilitates graceful shutdown of the consumer runtime.
///
/// Cloning this handle allows tasks to listen for shutdown (internal or from
/// the OS). The original handle triggers shutdown and awaits completion of
/// all other handles through [`Shutdown::complete`].
#[derive(Debug)]
pub struct Shutdown {
    cancel_token: CancellationToken,
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: Option<mpsc::Receiver<()>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let cancel_token = CancellationToken::new();
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        Self {
            cancel_token,
            shutdown_complete_tx,
            shutdown_complete_rx: Some(shutdown_complete_rx),
        }
    }

    /// The underlying token, handed to `BrokerSession`/`Handler` calls that
    /// need to observe cancellation directly.
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancels the token, waking every clone's [`recv`](Self::recv).
    pub fn start(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Suspends until [`start`](Self::start) has been (or already was) called.
    pub async fn recv(&self) {
        self.cancel_token.cancelled().await;
    }

    /// Waits for `SIGTERM`/`SIGINT` (`SIGINT` only on Windows) and calls
    /// [`start`](Self::start).
    pub async fn signal_listener(&self) {
        let ctrl_c_signal = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let mut sigterm_signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c_signal => {},
            _ = sigterm_signal.recv() => {}
        }

        #[cfg(windows)]
        let _ = ctrl_c_signal.await;

        warn!("Shutdown signal received!");
        self.start();
    }

    /// Consumes the original handle, waiting for every clone to be dropped
    /// (i.e. every task holding one to have finished) before returning.
    pub async fn complete(self) {
        drop(self.shutdown_complete_tx);
        self.shutdown_complete_rx
            .expect("complete() called on a cloned handle")
            .recv()
            .await;
        info!("Shutdown complete!");
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Shutdown {
    /// The clone can signal and observe shutdown but does not hold the
    /// completion receiver.
    fn clone(&self) -> Self {
        Self {
            cancel_token: self.cancel_token.clone(),
            shutdown_complete_tx: self.shutdown_complete_tx.clone(),
            shutdown_complete_rx: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_recv_returns_after_start() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        let task = tokio::spawn(async move {
            clone.recv().await;
            1
        });
        tokio::spawn({
            let s = shutdown.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                s.start();
            }
        });

        let value = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("shutdown not received in time"),
            v = task => v.unwrap(),
        };
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_complete_waits_for_all_clones_to_drop() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        let flag = Arc::new(Mutex::new(false));
        let flag_clone = flag.clone();

        tokio::spawn(async move {
            clone.recv().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            *flag_clone.lock().unwrap() = true;
        });

        shutdown.start();
        shutdown.complete().await;

        assert!(*flag.lock().unwrap());
    }

    #[tokio::test]
    async fn test_is_shutting_down_reflects_start() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_shutting_down());
        shutdown.start();
        assert!(shutdown.is_shutting_down());
    }
}
