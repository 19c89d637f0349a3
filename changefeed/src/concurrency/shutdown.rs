//! Cooperative shutdown of the consume-commit loop.
//!
//! The shutdown flag is a [`watch`] channel holding a boolean that starts unset, is set at most
//! once and is never unset. The loop races its blocking waits against [`ShutdownRx::wait`], so
//! setting the flag interrupts a poll in progress by dropping it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::concurrency::signal::ClosedRx;

/// Result of a wait that may be interrupted by a shutdown request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

/// Sending side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Sets the shutdown flag.
    ///
    /// Returns `true` for the call that set it and `false` for every later call, which has no
    /// effect.
    pub fn shutdown(&self) -> bool {
        self.0
            .send_if_modified(|requested| !std::mem::replace(requested, true))
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Waits until shutdown is requested.
    ///
    /// Never returns if every [`ShutdownTx`] is dropped without requesting it.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), ShutdownRx(rx))
}

/// Handle used outside the loop to stop it and wait for it to release its clients.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: ShutdownTx,
    closed_rx: ClosedRx,
}

impl ShutdownHandle {
    pub fn new(shutdown_tx: ShutdownTx, closed_rx: ClosedRx) -> Self {
        Self {
            shutdown_tx,
            closed_rx,
        }
    }

    /// Requests shutdown without waiting. Returns `false` if it was already requested.
    pub fn trigger(&self) -> bool {
        self.shutdown_tx.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_rx.is_closed()
    }

    /// Requests shutdown and waits until the loop reached its closed state.
    pub async fn shutdown_and_wait(&mut self) {
        if self.trigger() {
            info!("shutdown requested, waiting for the pipeline to close");
        }

        self.closed_rx.wait_closed().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::concurrency::signal::create_closed_signal;

    #[tokio::test]
    async fn shutdown_is_set_once_and_never_unset() {
        let (tx, mut rx) = create_shutdown_channel();

        assert!(tx.shutdown());
        assert!(!tx.shutdown());

        // Receivers created before and after the request both observe it.
        rx.wait().await;
        tx.subscribe().wait().await;
    }

    #[tokio::test]
    async fn wait_interrupts_a_pending_future() {
        let (tx, mut rx) = create_shutdown_channel();

        let waiter = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = rx.wait() => ShutdownResult::Shutdown(()),
                _ = tokio::time::sleep(Duration::from_secs(30)) => ShutdownResult::Ok(()),
            }
        });
        tx.shutdown();

        assert_eq!(waiter.await.unwrap(), ShutdownResult::Shutdown(()));
    }

    #[tokio::test]
    async fn handle_waits_for_the_closed_confirmation() {
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();
        let (closed_tx, closed_rx) = create_closed_signal();
        let mut handle = ShutdownHandle::new(shutdown_tx, closed_rx);

        let worker = tokio::spawn(async move {
            shutdown_rx.wait().await;
            closed_tx.notify_closed();
        });

        handle.shutdown_and_wait().await;
        handle.shutdown_and_wait().await;

        assert!(handle.is_closed());
        worker.await.unwrap();
    }
}
