use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned task that lives exactly as long as its owner. Dropping the
/// guard aborts the task, so timers and watchers cannot outlive the session
/// that started them.
#[derive(Debug)]
pub struct ScopedTask {
    handle: JoinHandle<()>,
}

impl ScopedTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to run to completion on its own.
    pub async fn join(mut self) {
        if let Err(err) = (&mut self.handle).await {
            if err.is_panic() {
                tracing::error!("Scoped task panicked: {err}");
            }
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
