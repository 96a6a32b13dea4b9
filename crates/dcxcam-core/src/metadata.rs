//! Per-frame metadata attached to every published image.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;

pub const KEY_CAMERA: &str = "Camera";
pub const KEY_START_TIME: &str = "StartTime-ms";
pub const KEY_ELAPSED_TIME: &str = "ElapsedTime-ms";
pub const KEY_ROI_X: &str = "ROI-X-start";
pub const KEY_ROI_Y: &str = "ROI-Y-start";
pub const KEY_IMAGE_NUMBER: &str = "ImageNumber";

/// Metadata for one frame of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub camera: String,
    /// Wall-clock time the sequence started.
    pub start_time: DateTime<Utc>,
    /// Time since the sequence started, from a monotonic clock.
    pub elapsed: Duration,
    /// Zero-based index within the sequence.
    pub image_number: u64,
    pub roi_x: u32,
    pub roi_y: u32,
}

impl MetadataRecord {
    pub fn new(
        camera: impl Into<String>,
        start_time: DateTime<Utc>,
        elapsed: Duration,
        image_number: u64,
        roi_x: u32,
        roi_y: u32,
    ) -> Self {
        Self {
            camera: camera.into(),
            start_time,
            elapsed,
            image_number,
            roi_x,
            roi_y,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Serialize to the JSON object handed to the frame sink. All values
    /// are strings.
    pub fn serialize(&self) -> String {
        json!({
            KEY_CAMERA: self.camera,
            KEY_START_TIME: self.start_time.timestamp_millis().to_string(),
            KEY_ELAPSED_TIME: format!("{:.3}", self.elapsed_ms()),
            KEY_ROI_X: self.roi_x.to_string(),
            KEY_ROI_Y: self.roi_y.to_string(),
            KEY_IMAGE_NUMBER: self.image_number.to_string(),
        })
        .to_string()
    }
}
