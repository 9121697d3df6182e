//! Fixed-delay reconnect scheduling.
//!
//! A [`ReconnectPolicy`] owns at most one pending [`RetryHandle`]. There is
//! no attempt cap and no backoff growth: every abnormal close schedules one
//! retry after the same delay, forever, until the owner cancels it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ReconnectError;

/// Default delay between a close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// A scheduled, cancellable one-shot task.
#[derive(Debug)]
pub struct RetryHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RetryHandle {
    /// Run `action` once after `delay` unless cancelled first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + delay;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => action(),
            }
        });
        Self { cancel, task }
    }

    /// Cancel the task. Returns `true` if it had not yet run.
    pub fn cancel(&self) -> bool {
        let pending = !self.task.is_finished();
        self.cancel.cancel();
        pending
    }

    /// Whether the task has completed (fired or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RetryHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Single-slot retry scheduler.
#[derive(Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    slot: Option<RetryHandle>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Create a policy with a fixed delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay, slot: None }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a retry is armed and has not yet fired.
    pub fn is_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Arm the retry slot. Fails if a retry is already pending.
    pub fn schedule_retry<F>(&mut self, action: F) -> Result<(), ReconnectError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_pending() {
            return Err(ReconnectError::AlreadyScheduled);
        }
        debug!(delay = ?self.delay, "reconnect scheduled");
        self.slot = Some(RetryHandle::spawn(self.delay, action));
        Ok(())
    }

    /// Cancel the pending retry. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.slot.take().is_some_and(|h| h.cancel())
    }

    /// Release the slot after its retry has fired.
    pub fn clear_fired(&mut self) {
        self.slot = None;
    }
}
