//! Completion signal sent by the consume-commit loop once it reached its terminal state.

use tokio::sync::watch;

/// Sending side of the closed signal, owned by the loop.
#[derive(Debug)]
pub struct ClosedTx(watch::Sender<bool>);

impl ClosedTx {
    /// Marks the loop as closed. Further calls have no effect.
    pub fn notify_closed(&self) {
        self.0.send_if_modified(|closed| !std::mem::replace(closed, true));
    }
}

/// Receiving side of the closed signal.
#[derive(Debug, Clone)]
pub struct ClosedRx(watch::Receiver<bool>);

impl ClosedRx {
    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until the loop is closed.
    ///
    /// Also returns when the loop dropped its sender without signaling, which happens when the
    /// task running it panicked or was aborted.
    pub async fn wait_closed(&mut self) {
        let _ = self.0.wait_for(|closed| *closed).await;
    }
}

pub fn create_closed_signal() -> (ClosedTx, ClosedRx) {
    let (tx, rx) = watch::channel(false);
    (ClosedTx(tx), ClosedRx(rx))
}
