use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::model::{CancelReason, TaskStatus};

/// Shared status/cancellation state for one race. Cloned cheaply (everything
/// inside is `Arc`-backed) and held by the Supervisor and every Command it
/// spawns.
#[derive(Clone)]
pub struct Task {
    status: std::sync::Arc<AtomicU8>,
    reason: std::sync::Arc<Mutex<Option<CancelReason>>>,
    token: CancellationToken,
    /// Separate token for the "second interrupt" escalation path (spec
    /// §4.D.3): cancelling this short-circuits a Command's TERM-then-grace
    /// wait straight to SIGKILL, without affecting `token`/`reason`.
    force_token: CancellationToken,
    started: std::sync::Arc<Notify>,
    done: std::sync::Arc<Notify>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            status: std::sync::Arc::new(AtomicU8::new(TaskStatus::NotStarted as u8)),
            reason: std::sync::Arc::new(Mutex::new(None)),
            token: CancellationToken::new(),
            force_token: CancellationToken::new(),
            started: std::sync::Arc::new(Notify::new()),
            done: std::sync::Arc::new(Notify::new()),
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn mark_started(&self) {
        self.set_status(TaskStatus::Running);
        self.started.notify_waiters();
    }

    pub fn mark_completed(&self) {
        self.set_status(TaskStatus::Completed);
        self.done.notify_waiters();
    }

    /// Idempotent, first-writer-wins cancellation. Returns `true` if this
    /// call is the one that actually triggered cancellation.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut guard = self.reason.lock().unwrap();
        if guard.is_some() {
            return false;
        }
        *guard = Some(reason);
        drop(guard);
        if self.status() < TaskStatus::Terminating {
            self.set_status(TaskStatus::Terminating);
        }
        self.token.cancel();
        true
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self.reason.lock().unwrap()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn force_token(&self) -> CancellationToken {
        self.force_token.clone()
    }

    /// Escalates an in-progress termination straight to SIGKILL. Idempotent:
    /// a `CancellationToken` is already a fire-once flag, so repeated calls
    /// are harmless.
    pub fn force_kill(&self) {
        self.force_token.cancel();
    }

    pub async fn wait_started(&self) {
        if self.status() >= TaskStatus::Running {
            return;
        }
        self.started.notified().await;
    }

    pub async fn wait_done(&self) {
        if self.status() == TaskStatus::Completed {
            return;
        }
        self.done.notified().await;
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_started() {
        let t = Task::new();
        assert_eq!(t.status(), TaskStatus::NotStarted);
        assert!(!t.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_first_wins() {
        let t = Task::new();
        assert!(t.cancel(CancelReason::WinnerFound));
        assert!(!t.cancel(CancelReason::Timeout));
        assert!(matches!(t.cancel_reason(), Some(CancelReason::WinnerFound)));
        assert!(t.is_cancelled());
        assert_eq!(t.status(), TaskStatus::Terminating);
    }

    #[test]
    fn force_kill_is_independent_of_cancel_reason() {
        let t = Task::new();
        assert!(!t.force_token().is_cancelled());
        t.force_kill();
        assert!(t.force_token().is_cancelled());
        // force_kill does not set a cancel reason or touch `token`/status.
        assert!(t.cancel_reason().is_none());
        assert!(!t.is_cancelled());
    }

    #[tokio::test]
    async fn wait_started_resolves_after_mark() {
        let t = Task::new();
        t.mark_started();
        t.wait_started().await;
        assert_eq!(t.status(), TaskStatus::Running);
    }

    #[tokio::test]
    async fn wait_done_resolves_after_mark() {
        let t = Task::new();
        t.mark_started();
        t.mark_completed();
        t.wait_done().await;
        assert_eq!(t.status(), TaskStatus::Completed);
    }
}
