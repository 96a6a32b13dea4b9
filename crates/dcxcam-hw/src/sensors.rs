//! Sensor profile database.
//!
//! Maps camera model names to sensor geometry and timing limits. Profile
//! files are embedded at compile time from `contrib/sensors/*.toml`.

use crate::camera::SensorInfo;
use serde::Deserialize;
use std::sync::OnceLock;

const SENSOR_DCC1545M: &str = include_str!("../../../contrib/sensors/dcc1545m.toml");
const SENSOR_DCC3240M: &str = include_str!("../../../contrib/sensors/dcc3240m.toml");
const SENSOR_DCU223M: &str = include_str!("../../../contrib/sensors/dcu223m.toml");

/// Model used when no sensor is configured.
pub const DEFAULT_SENSOR_MODEL: &str = "DCC1545M";

static SENSOR_DB: OnceLock<Vec<SensorProfile>> = OnceLock::new();

/// Top-level profile structure (one per `contrib/sensors/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct SensorProfile {
    pub sensor: SensorSection,
    pub timing: TimingSection,
}

/// Geometry and readout fields from the `[sensor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorSection {
    pub model: String,
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
    /// Supported readout depths in bits.
    pub bit_depths: Vec<u32>,
    /// Allowed binning factors.
    pub binning: Vec<u32>,
}

/// Limits from the `[timing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    /// Inclusive pixel clock range in MHz.
    pub pixel_clock_mhz: (u32, u32),
    /// Inclusive exposure range in milliseconds.
    pub exposure_ms: (f64, f64),
}

impl SensorProfile {
    pub fn sensor_info(&self) -> SensorInfo {
        SensorInfo {
            model: self.sensor.model.clone(),
            name: self.sensor.name.clone(),
            max_width: self.sensor.max_width,
            max_height: self.sensor.max_height,
            bit_depths: self.sensor.bit_depths.clone(),
            binning_factors: self.sensor.binning.clone(),
            exposure_range_ms: self.timing.exposure_ms,
        }
    }

    pub fn supports_bit_depth(&self, bits: u32) -> bool {
        self.sensor.bit_depths.contains(&bits)
    }
}

fn sensor_db() -> &'static Vec<SensorProfile> {
    SENSOR_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [SENSOR_DCC1545M, SENSOR_DCC3240M, SENSOR_DCU223M] {
            match toml::from_str::<SensorProfile>(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "bad sensor profile TOML"),
            }
        }
        db
    })
}

/// Look up a profile by model name (case-insensitive).
pub fn lookup_sensor(model: &str) -> Option<&'static SensorProfile> {
    sensor_db()
        .iter()
        .find(|p| p.sensor.model.eq_ignore_ascii_case(model))
}

/// List all known profiles.
pub fn list_sensors() -> &'static [SensorProfile] {
    sensor_db()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_profiles_parse() {
        assert_eq!(list_sensors().len(), 3);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let p = lookup_sensor("dcc1545m").unwrap();
        assert_eq!(p.sensor.model, "DCC1545M");
        assert_eq!(p.sensor.max_width, 1280);
        assert_eq!(p.sensor.max_height, 1024);
        assert_eq!(p.sensor.binning, vec![1]);
    }

    #[test]
    fn test_default_model_exists() {
        assert!(lookup_sensor(DEFAULT_SENSOR_MODEL).is_some());
    }

    #[test]
    fn test_unknown_model() {
        assert!(lookup_sensor("DCC9999X").is_none());
    }

    #[test]
    fn test_timing_ranges() {
        let p = lookup_sensor("DCC3240M").unwrap();
        assert_eq!(p.timing.pixel_clock_mhz, (7, 86));
        assert!(p.timing.exposure_ms.0 < p.timing.exposure_ms.1);
        assert!(p.supports_bit_depth(16));
        assert!(!lookup_sensor("DCU223M").unwrap().supports_bit_depth(16));
    }
}
