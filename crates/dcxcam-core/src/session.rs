//! Acquisition session state machine.
//!
//! Idle → Running on start, Running → Stopping when the worker leaves its
//! loop, Stopping → Idle once capture and event resources are released.
//! Any other transition is refused.

use crate::error::AcquisitionError;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Session state shared by the controller and the acquisition worker.
#[derive(Debug, Default)]
pub struct Session {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SessionState::Idle
    }

    /// Idle → Running. Fails with `DeviceBusy` from any other state.
    pub fn begin(&self) -> Result<(), AcquisitionError> {
        if self.transition(SessionState::Idle, SessionState::Running) {
            Ok(())
        } else {
            Err(AcquisitionError::DeviceBusy("sequence acquisition running"))
        }
    }

    /// Running → Stopping.
    pub fn begin_stopping(&self) -> bool {
        self.transition(SessionState::Running, SessionState::Stopping)
    }

    /// Stopping → Idle. Wakes anyone waiting for the session to end.
    pub fn finish(&self) -> bool {
        self.transition(SessionState::Stopping, SessionState::Idle)
    }

    /// Block until the session is Idle or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s != SessionState::Idle)
            .unwrap_or_else(|e| e.into_inner());
        *state == SessionState::Idle
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.lock();
        if *state != from {
            tracing::debug!(current = ?*state, ?from, ?to, "session transition refused");
            return false;
        }
        *state = to;
        tracing::trace!(?from, ?to, "session transition");
        self.changed.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
