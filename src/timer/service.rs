//! The scheduling primitive behind the transaction timers.
//!
//! The stack owns timer policy (which timer, what duration, what happens);
//! the service below owns only the one-shot scheduling. Callbacks run on the
//! service's own task and must stay cheap; the stack's callback only posts a
//! [`crate::timer::types::TimerPolicy`] record into its command loop.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::trace;

/// Handle to an armed timer. Dropping the handle cancels the timer; a timer
/// whose handle was dropped before it fired never runs its callback.
#[derive(Debug)]
pub struct TimerHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    /// Explicit cancellation; equivalent to dropping the handle.
    pub fn cancel(mut self) {
        self.disarm();
    }

    fn disarm(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// One-shot timer scheduling. Implementations fire callbacks on their own
/// task; callers never assume an execution context.
pub trait TimerService: Send + Sync + std::fmt::Debug {
    /// Arms a one-shot timer. The callback runs once after `duration` unless
    /// the returned handle is dropped first.
    fn schedule(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Tokio-backed timer service: each armed timer is a task racing a sleep
/// against its cancellation channel. Works under paused test time.
#[derive(Debug, Default)]
pub struct TokioTimerService;

impl TokioTimerService {
    pub fn new() -> Self {
        TokioTimerService
    }
}

impl TimerService for TokioTimerService {
    fn schedule(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => callback(),
                _ = cancel_rx => {
                    trace!("timer cancelled before firing");
                }
            }
        });
        TimerHandle {
            cancel_tx: Some(cancel_tx),
        }
    }
}
