//! Server-wide stop signal and task draining.
//!
//! One [`CancellationToken`] fans out to the listener, the event dispatcher
//! and every WebSocket session. [`ShutdownCoordinator::graceful_shutdown`]
//! fires it and then drains the tasks it was given, aborting whatever is
//! still running once the grace period ends.

use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period used when the caller passes no timeout.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to the tasks handed to
/// [`graceful_shutdown`](ShutdownCoordinator::graceful_shutdown).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that returned on their own.
    pub finished: usize,
    /// Tasks that panicked while draining.
    pub panicked: usize,
    /// Tasks still running at the deadline, aborted.
    pub aborted: usize,
}

impl DrainReport {
    /// Whether every task returned on its own.
    pub fn is_clean(&self) -> bool {
        self.aborted == 0 && self.panicked == 0
    }
}

/// Owns the server's stop signal.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator whose token has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the stop token, for tasks that must exit on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop token has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop token and drain `handles`, aborting stragglers after
    /// `timeout` (30 s when `None`).
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> DrainReport {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let mut tasks = JoinSet::new();
        for handle in handles {
            let _ = tasks.spawn(handle);
        }
        info!(tasks = tasks.len(), ?timeout, "draining server tasks");

        let mut report = DrainReport::default();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok(()))) => report.finished += 1,
                    Some(Ok(Err(e))) | Some(Err(e)) if e.is_panic() => report.panicked += 1,
                    Some(_) => report.aborted += 1,
                    None => break,
                },
                () = &mut deadline => {
                    report.aborted += tasks.len();
                    warn!(remaining = tasks.len(), "drain timed out, aborting remaining tasks");
                    aborts.iter().for_each(AbortHandle::abort);
                    tasks.shutdown().await;
                    break;
                }
            }
        }
        info!(
            finished = report.finished,
            panicked = report.panicked,
            aborted = report.aborted,
            "shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_fires_once_shutdown_called() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drains_tasks_that_watch_the_token() {
        let coord = ShutdownCoordinator::new();
        let handles = (0..3)
            .map(|_| {
                let token = coord.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();
        let report = coord
            .graceful_shutdown(handles, Some(Duration::from_secs(1)))
            .await;
        assert_eq!(report, DrainReport { finished: 3, panicked: 0, aborted: 0 });
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_stragglers_at_the_deadline() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let polite = tokio::spawn(async move { token.cancelled().await });
        let stuck = tokio::spawn(std::future::pending::<()>());
        let started = tokio::time::Instant::now();

        let report = coord
            .graceful_shutdown(vec![polite, stuck], Some(Duration::from_secs(2)))
            .await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(report.finished, 1);
        assert_eq!(report.aborted, 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn counts_panicked_tasks() {
        let coord = ShutdownCoordinator::new();
        let boom = tokio::spawn(async { panic!("boom") });
        let report = coord
            .graceful_shutdown(vec![boom], Some(Duration::from_secs(1)))
            .await;
        assert_eq!(report.panicked, 1);
        assert!(!report.is_clean());
    }
}
