use std::sync::Arc;

use tokio::sync::watch;

/// Handle used to request cancellation of a running stream.
///
/// Cloning shares the same underlying signal. Aborting is idempotent and safe
/// to call after the stream it guards has already finished.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    /// Creates a linked handle/signal pair.
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `abort` has been called on any clone.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AbortSignal {
    /// Returns true once cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    ///
    /// Never resolves if every handle is dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
