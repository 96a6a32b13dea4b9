//! Hardware interface for DCx-class USB cameras.
//!
//! The acquisition core only ever talks to the device through
//! [`CameraHardware`]. A vendor SDK binding implements it against real
//! hardware; [`crate::sim::SimCamera`] implements it in memory.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HwError {
    #[error("camera not initialized")]
    NotInitialized,
    #[error("frame memory allocation failed: {0}")]
    AllocationFailed(String),
    #[error("unknown frame memory region {0}")]
    UnknownRegion(u32),
    #[error("no active frame memory region")]
    NoActiveRegion,
    #[error("color mode rejected: {0:?}")]
    ColorModeRejected(ColorMode),
    #[error("{name} out of range: {value}")]
    OutOfRange { name: &'static str, value: f64 },
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame event {0:?} is not armed")]
    EventNotArmed(EventHandle),
    #[error("destination buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

/// Static sensor description reported by the device at init.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub model: String,
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
    /// Readout depths the sensor supports, in bits.
    pub bit_depths: Vec<u32>,
    /// Binning factors the sensor supports.
    pub binning_factors: Vec<u32>,
    /// Inclusive exposure range in milliseconds.
    pub exposure_range_ms: (f64, f64),
}

/// Sensor readout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Raw 8-bit sensor data, one byte per pixel.
    SensorRaw8,
    /// Raw sensor data in 16-bit little-endian words.
    SensorRaw16,
}

impl ColorMode {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::SensorRaw8 => 8,
            Self::SensorRaw16 => 16,
        }
    }
}

/// Handle to a frame-memory region registered with the device.
///
/// The device writes every captured frame into the currently active region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
}

impl RegionDescriptor {
    pub fn bytes_per_pixel(&self) -> u32 {
        crate::frame::bytes_per_pixel(self.bits_per_pixel)
    }

    /// Size of the region in bytes (width × height × bytes-per-pixel).
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel() as usize
    }
}

/// Opaque handle of an armed frame-ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Outcome of waiting on a frame-ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    Timeout,
    /// The event object reported a status the bridge does not understand.
    Unknown(u32),
}

/// Operations the acquisition core consumes from the camera.
///
/// All methods take `&self`: the controller and the acquisition worker
/// share one device handle, so implementations synchronize internally.
pub trait CameraHardware: Send + Sync {
    /// Open the device and report its sensor.
    fn init(&self) -> Result<SensorInfo, HwError>;

    /// Release the device. Frees every region still registered.
    fn shutdown(&self) -> Result<(), HwError>;

    fn alloc_region(
        &self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<RegionDescriptor, HwError>;

    fn free_region(&self, region: &RegionDescriptor) -> Result<(), HwError>;

    /// Make `region` the capture target. Only one region is active at a time.
    fn set_active_region(&self, region: &RegionDescriptor) -> Result<(), HwError>;

    /// Copy the current contents of `region` into `dst`.
    fn read_region(&self, region: &RegionDescriptor, dst: &mut [u8]) -> Result<(), HwError>;

    /// Capture exactly one frame into the active region, blocking until done.
    fn freeze_frame(&self, timeout: Duration) -> Result<(), HwError>;

    fn start_continuous_capture(&self) -> Result<(), HwError>;

    fn stop_continuous_capture(&self) -> Result<(), HwError>;

    fn arm_frame_event(&self) -> Result<EventHandle, HwError>;

    /// Block until the device signals a new frame or `timeout` elapses.
    fn wait_frame_event(&self, handle: EventHandle, timeout: Duration) -> WaitStatus;

    fn disarm_frame_event(&self, handle: EventHandle) -> Result<(), HwError>;

    fn set_color_mode(&self, mode: ColorMode) -> Result<(), HwError>;

    /// Set exposure in milliseconds, returning the value the device applied.
    fn set_exposure(&self, exposure_ms: f64) -> Result<f64, HwError>;

    fn set_gain(&self, gain: u32) -> Result<(), HwError>;

    /// Inclusive pixel clock range in MHz.
    fn pixel_clock_range(&self) -> Result<(u32, u32), HwError>;

    fn pixel_clock(&self) -> Result<u32, HwError>;

    fn set_pixel_clock(&self, mhz: u32) -> Result<(), HwError>;
}
