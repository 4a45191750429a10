//! Session cancellation shared by the controller, the scheduler and the
//! fallback chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// One-shot cancellation flag that can be awaited.
///
/// Anything that hands audio to the output goes through
/// [`unless_cancelled`](Self::unless_cancelled). `cancel` takes the same
/// gate, so once it returns no further hand-off can happen; a hand-off that
/// won the gate first is discarded by the `stop()` that follows the cancel.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    gate: Mutex<()>,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        {
            let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
            self.cancelled.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Run `f` unless cancelled, holding off any concurrent `cancel` until it
    /// returns.
    pub fn unless_cancelled<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cancelled() {
            return None;
        }
        Some(f())
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let signal = Arc::new(CancelSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        // Already cancelled: resolves immediately.
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_hand_off_refused_after_cancel() {
        let signal = CancelSignal::new();
        assert_eq!(signal.unless_cancelled(|| 7), Some(7));
        signal.cancel();
        let mut ran = false;
        assert_eq!(signal.unless_cancelled(|| ran = true), None);
        assert!(!ran);
    }

    #[test]
    fn test_cancel_waits_for_hand_off_in_progress() {
        let signal = Arc::new(CancelSignal::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let handing_off = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                signal.unless_cancelled(|| {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
            })
        };
        entered_rx.recv().unwrap();

        let canceller = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.cancel())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!signal.is_cancelled());

        release_tx.send(()).unwrap();
        assert_eq!(handing_off.join().unwrap(), Some(()));
        canceller.join().unwrap();
        assert!(signal.is_cancelled());
    }
}
