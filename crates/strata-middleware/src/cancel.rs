//! Cancellation of in-flight executions.
//!
//! The transport layer holds a [`CancelSignal`] per exchange and trips it
//! when the client disconnects. The executor checks the signal before
//! entering each unit and before the terminal handler; a unit that is
//! already running is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// A clonable, one-shot cancellation flag.
///
/// # Example
///
/// ```
/// use strata_middleware::CancelSignal;
///
/// let signal = CancelSignal::new();
/// let transport_side = signal.clone();
///
/// transport_side.cancel();
/// assert!(signal.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl CancelSignal {
    /// Creates an untripped signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Trips the signal. Later calls do nothing.
    pub fn cancel(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Completes when the signal is tripped, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_cancelled() {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        signal.cancel();
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_completes_for_waiters() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_trip_returns_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(50), signal.cancelled())
            .await
            .expect("already cancelled");
    }
}
