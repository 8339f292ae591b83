//! Stoppable background tasks

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned task paired with its one-shot stop signal
///
/// The task receives the signal's receiving half and must return once it
/// fires (or once the sender is dropped).
pub struct BackgroundTask {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(task(stop_rx));
        tracing::debug!("Spawned background task: {}", name);
        Self {
            name,
            stop: Some(stop_tx),
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to return
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            // Err means the task already returned
            let _ = stop.send(());
        }

        match (&mut self.handle).await {
            Ok(()) => tracing::debug!("Background task stopped: {}", self.name),
            Err(e) if e.is_panic() => {
                tracing::error!("Background task {} panicked", self.name)
            }
            Err(e) => tracing::debug!("Background task {} ended: {}", self.name, e),
        }
    }
}
