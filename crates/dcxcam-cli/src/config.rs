use anyhow::{Context, Result};
use dcxcam_core::CameraConfig;
use serde::Deserialize;
use std::path::Path;

/// CLI configuration: an optional TOML file, then `DCXCAM_*` environment
/// overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    /// Frames the in-memory sink holds before reporting overflow.
    pub queue_capacity: usize,
    /// Frame period of the simulated sensor.
    pub frame_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            queue_capacity: 16,
            frame_period_ms: 10,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(label) = std::env::var("DCXCAM_LABEL") {
            self.camera.label = label;
        }
        if let Ok(model) = std::env::var("DCXCAM_SENSOR") {
            self.camera.sensor_model = model;
        }
        let camera = &mut self.camera;
        camera.event_timeout_ms = env_u64("DCXCAM_EVENT_TIMEOUT_MS", camera.event_timeout_ms);
        camera.exposure_ms = env_f64("DCXCAM_EXPOSURE_MS", camera.exposure_ms);
        camera.gain = env_u64("DCXCAM_GAIN", u64::from(camera.gain))
            .try_into()
            .unwrap_or(camera.gain);
        self.queue_capacity = env_u64("DCXCAM_QUEUE_CAPACITY", self.queue_capacity as u64)
            .try_into()
            .unwrap_or(self.queue_capacity);
        self.frame_period_ms = env_u64("DCXCAM_FRAME_PERIOD_MS", self.frame_period_ms);
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_with_camera_table() {
        let config: Config = toml::from_str(
            r#"
            queue_capacity = 4

            [camera]
            label = "Left"
            sensor_model = "DCC3240M"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.frame_period_ms, 10);
        assert_eq!(config.camera.label, "Left");
        assert_eq!(config.camera.sensor_model, "DCC3240M");
        assert_eq!(config.camera.event_timeout_ms, 2000);
    }

    #[test]
    fn test_env_helpers_fall_back() {
        assert_eq!(env_u64("DCXCAM_TEST_UNSET_U64", 7), 7);
        assert_eq!(env_f64("DCXCAM_TEST_UNSET_F64", 1.5), 1.5);
    }
}
