//! Cancelable background tasks.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned background loop together with its shutdown switch.
///
/// Dropping the handle also stops the task: the loop sees the shutdown
/// channel close and exits.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body` with a fresh shutdown receiver.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(body(shutdown_rx));
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, error = %e, "Background task ended abnormally");
        } else {
            tracing::debug!(task = self.name, "Background task stopped");
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
