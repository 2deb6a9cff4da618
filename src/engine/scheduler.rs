//! Cancelable one-shot timer shared by retry, connect-delay and debounce logic
//!
//! Every delayed action in the engine (backoff retry, delayed reachability
//! transition, notification debounce) goes through [`ScheduledTask`], so the
//! "nothing fires after disposal" invariant is enforced in one place: each
//! scheduled run is gated by a child of the owner's cancellation token, and
//! scheduling on a canceled owner is a no-op.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A single-slot, cancel-then-reschedule timer.
///
/// `schedule()` always cancels the previously scheduled run first; at most
/// one run is pending at any time.
#[derive(Debug)]
pub struct ScheduledTask {
    parent: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl ScheduledTask {
    /// Ties the task to `parent`: once `parent` is canceled, pending runs are
    /// dropped and future `schedule()` calls do nothing.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            parent: parent.clone(),
            current: Mutex::new(None),
        }
    }

    /// Cancel any pending run and schedule `task` to run after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        if self.parent.is_cancelled() {
            return;
        }
        let token = self.parent.child_token();
        *self.current.lock() = Some(token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // cancel() may have raced with the timer firing
                    if !token.is_cancelled() {
                        task.await;
                    }
                }
            }
        });
    }

    /// Cancel the pending run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }

    /// Whether a run is currently pending (not yet fired or canceled).
    pub fn is_pending(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
