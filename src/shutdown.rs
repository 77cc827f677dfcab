//! Graceful shutdown coordination utilities.
//!
//! Every suspension point in the pipeline (rate-limit waits, failure backoff,
//! the ingestion loop's steady and recovery sleeps) races against a shared
//! [`ShutdownCoordinator`] so Ctrl+C interrupts a pending 30-minute sleep
//! immediately instead of waiting it out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a request landing in
        // between cannot be missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed, `false` when the sleep
    /// was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

/// Sleep with an optional shutdown handle; without one the sleep always completes.
pub async fn sleep_unless_shutdown(shutdown: Option<&SharedShutdown>, duration: Duration) -> bool {
    match shutdown {
        Some(handle) => handle.sleep(duration).await,
        None => {
            tokio::time::sleep(duration).await;
            true
        }
    }
}
