//! Controller configuration.

use crate::types::PixelType;
use dcxcam_hw::sensors::DEFAULT_SENSOR_MODEL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings applied when the controller initializes the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device label passed to the frame sink and written into metadata.
    pub label: String,
    /// Sensor model to simulate or expect.
    pub sensor_model: String,
    /// How long the worker waits for one frame event before ending the
    /// sequence with a timeout.
    pub event_timeout_ms: u64,
    pub snap_timeout_ms: u64,
    pub exposure_ms: f64,
    pub gain: u32,
    pub binning: u32,
    pub pixel_type: PixelType,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            label: "DCxCam".into(),
            sensor_model: DEFAULT_SENSOR_MODEL.into(),
            event_timeout_ms: 2000,
            snap_timeout_ms: 5000,
            exposure_ms: 15.0,
            gain: 1,
            binning: 1,
            pixel_type: PixelType::Mono8,
        }
    }
}

impl CameraConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn snap_timeout(&self) -> Duration {
        Duration::from_millis(self.snap_timeout_ms)
    }
}
