//! Run-level cancellation.
//!
//! A host that wants a deadline keeps the [`CancelHandle`] and hands the matching
//! [`CancelSignal`] to the scenario. Worker loops look at the signal before pacing and
//! before each invocation, and stop quietly: the iteration they skip is not an error.

use tokio::sync::watch::{self, Receiver, Sender};

/// Create a connected handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even when every signal is gone
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observed by worker loops. The default signal never fires.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<Receiver<bool>>,
}

impl CancelSignal {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the run is cancelled; pending forever otherwise.
    pub async fn cancelled(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // handle dropped without cancelling
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn never_is_never_cancelled() {
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_every_clone() {
        let (handle, signal) = cancellation();
        let other = signal.clone();
        assert!(!signal.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves() {
        let (handle, mut signal) = cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (handle, mut signal) = cancellation();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }
}
