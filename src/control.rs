//! Cooperative pause/cancel control for an ingestion run.
//!
//! An [`IngestControl`] is owned by whoever drives the run (CLI signal
//! handler, UI button) and cloned into the orchestrator, which awaits
//! [`IngestControl::checkpoint`] before every remote page fetch and every
//! batch commit. Two levels:
//!
//! - **soft**: `request_pause()` makes the next checkpoint suspend until
//!   the controller decides — `resume()` to continue or `cancel()` to
//!   abort;
//! - **hard**: `cancel()` makes the next checkpoint abort immediately.
//!
//! Cancellation is cooperative and checkpoint-based, never preemptive: a
//! batch that has started its store/index write always completes, so
//! everything committed before the cancel stays durable.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    Running,
    PauseRequested,
    Cancelled,
}

#[derive(Clone)]
pub struct IngestControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    state: Mutex<ControlState>,
    notify: Notify,
}

impl IngestControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(ControlState::Running),
                notify: Notify::new(),
            }),
        }
    }

    /// Ask the run to suspend at its next checkpoint and await a decision.
    /// No-op if the run is already cancelled.
    pub fn request_pause(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if *state == ControlState::Running {
            *state = ControlState::PauseRequested;
        }
    }

    /// Continue a paused run.
    pub fn resume(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if *state == ControlState::PauseRequested {
            *state = ControlState::Running;
            self.inner.notify.notify_waiters();
        }
    }

    /// Abort the run at its next checkpoint. Valid both as the answer to a
    /// pause and as a direct hard cancel.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        *state = ControlState::Cancelled;
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.lock().unwrap() == ControlState::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.state.lock().unwrap() == ControlState::PauseRequested
    }

    /// The pause gate. Returns immediately while running, suspends while a
    /// pause is pending, and fails with [`Error::Cancelled`] once
    /// cancelled.
    pub async fn checkpoint(&self) -> Result<()> {
        loop {
            // Register for the wakeup before reading state, so a decision
            // landing in between is not missed.
            let notified = self.inner.notify.notified();
            let state = *self.inner.state.lock().unwrap();
            match state {
                ControlState::Running => return Ok(()),
                ControlState::Cancelled => return Err(Error::Cancelled),
                ControlState::PauseRequested => notified.await,
            }
        }
    }
}

impl Default for IngestControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn checkpoint_passes_while_running() {
        let control = IngestControl::new();
        control.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_fails_checkpoint_with_cancelled() {
        let control = IngestControl::new();
        control.cancel();
        let err = control.checkpoint().await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn pause_suspends_until_resume() {
        let control = IngestControl::new();
        control.request_pause();

        let gate = control.clone();
        let waiter = tokio::spawn(async move { gate.checkpoint().await });

        // Give the checkpoint time to reach the suspended state.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pause_then_cancel_aborts() {
        let control = IngestControl::new();
        control.request_pause();

        let gate = control.clone();
        let waiter = tokio::spawn(async move { gate.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn resume_does_not_revive_a_cancelled_run() {
        let control = IngestControl::new();
        control.cancel();
        control.resume();
        assert!(control.is_cancelled());
        assert!(control.checkpoint().await.is_err());
    }
}
