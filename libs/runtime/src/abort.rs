//! Cooperative abort for a pending start

use std::sync::Arc;
use tokio::sync::watch;

/// Fires its signals once
#[derive(Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the controller aborts. Never resolves if the controller
    /// is dropped first.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signals_observe_abort() {
        let controller = AbortController::new();
        let mut signal = controller.signal();
        assert!(!signal.is_aborted());

        let waiter = tokio::spawn(async move { signal.aborted().await });
        controller.abort();
        waiter.await.unwrap();
        assert!(controller.is_aborted());
        assert!(controller.signal().is_aborted());
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut signal = AbortSignal::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(fired.is_err());
    }
}
