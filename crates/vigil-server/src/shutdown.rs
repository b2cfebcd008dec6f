//! Graceful shutdown: one token observed by the HTTP server, every socket
//! and every submission listener.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for this task during [`graceful_shutdown`](Self::graceful_shutdown).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Cancel the token, then wait up to `timeout` for tracked tasks before
    /// aborting the rest.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        info!(task_count = handles.len(), "waiting for tasks to complete");

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let child = token.child_token();
        assert!(!coord.is_shutting_down());
        coord.token.cancel();
        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (tx, rx) = tokio::sync::oneshot::channel();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = tx.send(());
        }));

        coord.graceful_shutdown(Some(Duration::from_secs(1))).await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn aborts_stuck_tasks_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(std::future::pending::<()>());
        let abort = stuck.abort_handle();
        coord.track(stuck);

        coord.graceful_shutdown(Some(Duration::from_millis(20))).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while !abort.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
