use crate::properties::PropertyError;
use crate::sink::SinkError;
use dcxcam_hw::HwError;
use thiserror::Error;

/// Errors surfaced by the acquisition core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// The device could not provide a frame-memory region. The previous
    /// configuration stays in effect.
    #[error("frame memory allocation failed: {0}")]
    Allocation(String),
    /// Attempted while a sequence is running. Retry after stopping.
    #[error("device busy: {0}")]
    DeviceBusy(&'static str),
    #[error("no frame event within {timeout_ms} ms")]
    CaptureTimeout { timeout_ms: u64 },
    #[error("unknown frame event status {0:#x}")]
    UnknownEvent(u32),
    #[error("frame sink overflow")]
    PublishOverflow,
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),
    #[error("camera not initialized")]
    NotInitialized,
    #[error("frame buffer does not match the image size")]
    NotConfigured,
    #[error("invalid ROI: {0}")]
    InvalidRoi(String),
    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },
    #[error("failed to start acquisition worker: {0}")]
    WorkerSpawn(String),
    #[error("acquisition worker panicked")]
    WorkerPanicked,
    #[error("frame sink: {0}")]
    Sink(#[from] SinkError),
    #[error("property: {0}")]
    Property(#[from] PropertyError),
    #[error("hardware: {0}")]
    Hardware(#[from] HwError),
}

impl AcquisitionError {
    /// Whether the error ended a running sequence (as opposed to being
    /// local to the call that returned it).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::CaptureTimeout { .. }
                | Self::UnknownEvent(_)
                | Self::PublishOverflow
                | Self::FrameSize { .. }
                | Self::WorkerPanicked
                | Self::Sink(_)
                | Self::Hardware(_)
        )
    }
}
