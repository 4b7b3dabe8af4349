//! World-wide cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once any holder of this signal has cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Every sender is gone, so cancellation can no longer happen.
            std::future::pending::<()>().await;
        }
    }
}

/// A detachable handle that cancels the world it came from.
#[derive(Clone)]
pub struct CancelHandle(Signal);

impl CancelHandle {
    pub(crate) fn new(signal: Signal) -> Self {
        Self(signal)
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clones_observe_cancel() {
        let signal = Signal::new();
        let other = signal.clone();
        assert!(!other.is_cancelled());

        let waiter = tokio::spawn(async move { other.cancelled().await });
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
    }
}
