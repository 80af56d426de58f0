use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info};

/// Process-wide cooperative cancellation signal.
///
/// Clones share the same underlying flag; once triggered it stays triggered.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        if !self.is_triggered() {
            info!("Shutdown requested");
        }
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleeps for `duration` unless shutdown fires first. Returns `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for `signal`, or for the first long-running task in `tasks` to end on its own.
///
/// Returns `true` when a task ended first; that task has already been reaped and logged.
pub async fn wait_for_signal_or_exit<F>(tasks: &mut JoinSet<anyhow::Result<()>>, signal: F) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => false,
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Ok(())) => error!("Worker task exited before shutdown was requested"),
                Ok(Err(e)) => error!(error = %e, "Worker task failed"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
            true
        }
    }
}
