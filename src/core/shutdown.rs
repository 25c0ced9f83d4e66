//! Cooperative shutdown coordination
//!
//! A `ShutdownCoordinator` is a flag plus a broadcast channel. Step workers
//! check the flag between items and select on the channel while waiting on
//! their upstream queue, so a stop is observed without pre-empting work in
//! flight. The binary uses `guard` to wire process signals to the same
//! mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Coordinates a cooperative stop; clones share the same state
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    pub shutdown_tx: broadcast::Sender<()>,
    pub shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let shutdown_requested = Arc::new(AtomicBool::new(false));

        let coordinator = Self {
            shutdown_tx,
            shutdown_requested,
        };

        (coordinator, shutdown_rx)
    }

    /// Subscribe to shutdown notifications
    ///
    /// A receiver created after `trigger_shutdown` does not see the message;
    /// pair it with `is_shutdown_requested`.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown
    pub fn trigger_shutdown(&self) {
        // Release pairs with the Acquire load in is_shutdown_requested
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Run a future with process signals wired to a fresh coordinator
    ///
    /// The closure receives the coordinator so it can hand subscriptions to
    /// whatever it starts. A second signal exits the process immediately.
    pub async fn guard<F, Fut, R, E>(future_fn: F) -> Result<R, E>
    where
        F: FnOnce(Self) -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
    {
        let (coordinator, _shutdown_rx) = Self::new();

        setup_signal_handlers(
            coordinator.shutdown_tx.clone(),
            coordinator.shutdown_requested.clone(),
        );

        future_fn(coordinator).await
    }
}

/// Install signal handlers that trigger shutdown
fn setup_signal_handlers(shutdown_tx: broadcast::Sender<()>, shutdown_requested: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        // Results are written to stdout; a closed pipe should end the process quietly
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use std::sync::atomic::AtomicUsize;
        use tokio::signal::unix::{signal, SignalKind};
        let signal_count = Arc::new(AtomicUsize::new(0));

        for kind in [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::hangup(),
        ] {
            let tx = shutdown_tx.clone();
            let requested = shutdown_requested.clone();
            let sig_ctr = signal_count.clone();

            tokio::spawn(async move {
                if let Ok(mut sig) = signal(kind) {
                    while sig.recv().await.is_some() {
                        let prev = sig_ctr.fetch_add(1, Ordering::AcqRel);
                        requested.store(true, Ordering::Release);
                        let _ = tx.send(());
                        if prev >= 1 {
                            log::warn!("Second signal received; exiting without waiting for steps");
                            std::process::exit(130);
                        }
                        log::info!("Signal received; stopping steps after their current item");
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown_requested.store(true, Ordering::Release);
                let _ = shutdown_tx.send(());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_shutdown_coordinator_starts_clear() {
        let (coordinator, _rx) = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_trigger_is_seen_by_clones_and_subscribers() {
        let (coordinator, mut rx) = ShutdownCoordinator::new();
        let clone = coordinator.clone();
        let mut rx2 = clone.subscribe();

        coordinator.trigger_shutdown();

        assert!(clone.is_shutdown_requested());
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_late_subscriber_relies_on_flag() {
        let (coordinator, _rx) = ShutdownCoordinator::new();
        coordinator.trigger_shutdown();

        let mut late = coordinator.subscribe();
        assert!(timeout(Duration::from_millis(20), late.recv()).await.is_err());
        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_guard_passes_coordinator() {
        let result = ShutdownCoordinator::guard(|coordinator| async move {
            let mut rx = coordinator.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(20)) => Ok::<i32, &str>(42),
                _ = rx.recv() => Ok(-1),
            }
        })
        .await;

        assert_eq!(result, Ok(42));
    }
}
