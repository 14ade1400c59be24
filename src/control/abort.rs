use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-shot broadcast signal meaning "stop work and unwind".
///
/// Closing is idempotent: only the first [`AbortSignal::abort`] has any
/// effect. Observers either see the flag already set or are woken by the
/// closing notification, never both missed.
#[derive(Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the signal. Returns whether this call was the one that closed it.
    pub fn abort(&self) -> bool {
        let first = !self.aborted.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is closed.
    pub async fn aborted(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a concurrent abort cannot
        // slip between the check and the wait.
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_is_one_shot() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.abort());
        assert!(!signal.abort());
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn aborted_resolves_for_late_observers() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.aborted().await;
    }

    #[tokio::test]
    async fn aborted_wakes_pending_observers() {
        let signal = AbortSignal::new();
        let observer = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.aborted().await })
        };
        tokio::task::yield_now().await;
        signal.abort();
        observer.await.expect("observer should resolve");
    }
}
