use crate::error::AcquisitionError;
use dcxcam_hw::ColorMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Number of frames a sequence should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    Bounded(u64),
    Unbounded,
}

impl FrameCount {
    /// Whether `produced` frames complete the sequence.
    pub fn is_exhausted(self, produced: u64) -> bool {
        match self {
            Self::Bounded(n) => produced >= n,
            Self::Unbounded => false,
        }
    }
}

/// What to do when the frame sink reports its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// End the sequence with [`AcquisitionError::PublishOverflow`].
    Stop,
    /// Clear the sink's queue, re-insert the frame once, and continue.
    DropAndContinue,
}

impl OverflowPolicy {
    pub fn from_stop_on_overflow(stop_on_overflow: bool) -> Self {
        if stop_on_overflow {
            Self::Stop
        } else {
            Self::DropAndContinue
        }
    }
}

/// Parameters of one sequence acquisition, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceParams {
    pub frame_count: FrameCount,
    /// Requested inter-frame interval. Advisory only: frames are paced by
    /// the device's frame event.
    pub interval_hint: Duration,
    pub overflow: OverflowPolicy,
}

impl SequenceParams {
    pub fn new(frames: u64, interval_ms: f64, stop_on_overflow: bool) -> Self {
        Self {
            frame_count: FrameCount::Bounded(frames),
            // Negative and NaN clamp to zero, anything past Duration's range saturates.
            interval_hint: Duration::try_from_secs_f64(interval_ms.max(0.0) / 1000.0)
                .unwrap_or(Duration::MAX),
            overflow: OverflowPolicy::from_stop_on_overflow(stop_on_overflow),
        }
    }

    /// Unbounded sequence that never stops on overflow.
    pub fn continuous(interval_ms: f64) -> Self {
        Self {
            frame_count: FrameCount::Unbounded,
            ..Self::new(0, interval_ms, false)
        }
    }
}

/// Pixel format exposed through the `PixelType` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelType {
    #[default]
    #[serde(rename = "8bit")]
    Mono8,
    #[serde(rename = "16bit")]
    Mono16,
}

impl PixelType {
    pub const ALL: [PixelType; 2] = [PixelType::Mono8, PixelType::Mono16];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mono8 => "8bit",
            Self::Mono16 => "16bit",
        }
    }

    pub fn bit_depth(self) -> u32 {
        self.color_mode().bits_per_pixel()
    }

    pub fn color_mode(self) -> ColorMode {
        match self {
            Self::Mono8 => ColorMode::SensorRaw8,
            Self::Mono16 => ColorMode::SensorRaw16,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AcquisitionError::UnsupportedPixelFormat(s.to_string()))
    }
}

/// Region of interest in binned sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_exhaustion() {
        assert!(!FrameCount::Bounded(5).is_exhausted(4));
        assert!(FrameCount::Bounded(5).is_exhausted(5));
        assert!(FrameCount::Bounded(0).is_exhausted(0));
        assert!(!FrameCount::Unbounded.is_exhausted(u64::MAX));
    }

    #[test]
    fn test_sequence_params() {
        let p = SequenceParams::new(10, 50.0, true);
        assert_eq!(p.frame_count, FrameCount::Bounded(10));
        assert_eq!(p.interval_hint, Duration::from_millis(50));
        assert_eq!(p.overflow, OverflowPolicy::Stop);

        let c = SequenceParams::continuous(-1.0);
        assert_eq!(c.frame_count, FrameCount::Unbounded);
        assert_eq!(c.interval_hint, Duration::ZERO);
        assert_eq!(c.overflow, OverflowPolicy::DropAndContinue);
    }

    #[test]
    fn test_sequence_interval_saturates() {
        assert_eq!(SequenceParams::new(1, f64::INFINITY, true).interval_hint, Duration::MAX);
        assert_eq!(SequenceParams::new(1, 1e300, true).interval_hint, Duration::MAX);
        assert_eq!(SequenceParams::continuous(f64::NAN).interval_hint, Duration::ZERO);
    }

    #[test]
    fn test_pixel_type_parse() {
        assert_eq!("8bit".parse::<PixelType>().unwrap(), PixelType::Mono8);
        assert_eq!("16bit".parse::<PixelType>().unwrap(), PixelType::Mono16);
        assert_eq!(
            "32bitRGB".parse::<PixelType>(),
            Err(AcquisitionError::UnsupportedPixelFormat("32bitRGB".into()))
        );
        assert_eq!(PixelType::Mono16.bit_depth(), 16);
    }
}
