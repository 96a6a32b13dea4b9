//! Frame-ready event bridge.
//!
//! Turns the device's "new frame" notification into a blocking wait with a
//! timeout. The event must be armed before continuous capture starts and
//! disarmed only after capture has stopped.

use crate::camera::{CameraHardware, EventHandle, HwError, WaitStatus};
use std::sync::Arc;
use std::time::Duration;

/// An armed frame-ready event.
///
/// Disarm explicitly with [`FrameEvent::disarm`]; dropping an armed event
/// disarms it as a fallback and logs a warning.
pub struct FrameEvent {
    hw: Arc<dyn CameraHardware>,
    handle: EventHandle,
    armed: bool,
}

impl FrameEvent {
    /// Arm the device's frame-ready notification.
    pub fn arm(hw: Arc<dyn CameraHardware>) -> Result<Self, HwError> {
        let handle = hw.arm_frame_event()?;
        tracing::debug!(handle = handle.0, "frame event armed");
        Ok(Self {
            hw,
            handle,
            armed: true,
        })
    }

    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Block until the next frame is ready or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WaitStatus {
        self.hw.wait_frame_event(self.handle, timeout)
    }

    /// Disarm the event and release it.
    pub fn disarm(mut self) -> Result<(), HwError> {
        self.armed = false;
        tracing::debug!(handle = self.handle.0, "frame event disarmed");
        self.hw.disarm_frame_event(self.handle)
    }
}

impl Drop for FrameEvent {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(handle = self.handle.0, "frame event dropped while armed");
            if let Err(e) = self.hw.disarm_frame_event(self.handle) {
                tracing::warn!(error = %e, "frame event disarm failed");
            }
        }
    }
}
