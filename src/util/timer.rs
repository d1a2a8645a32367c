//! One-shot cancelable timers
//!
//! A timer is a spawned task that sleeps and then runs its callback. The
//! handle only aborts the task; whoever owns the callback is responsible for
//! re-checking state when it finally runs, since an abort that races with
//! the firing may arrive too late to stop it.

use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to a pending one-shot timer
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Arm a one-shot timer; `callback` runs after `delay` unless canceled
    pub fn once<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Self {
            abort: task.abort_handle(),
        }
    }

    /// Cancel the timer. Safe to call after it has fired.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
