//! Simulated camera for running the acquisition core without hardware.
//!
//! Frames are paced by a configurable frame period and filled with a moving
//! test pattern. Frame-event outcomes can be scripted, and allocation or
//! color-mode failures injected, so tests can drive every path of the
//! acquisition loop. Each hardware operation is counted.

use crate::camera::{
    CameraHardware, ColorMode, EventHandle, HwError, RegionDescriptor, SensorInfo, WaitStatus,
};
use crate::frame::fill_test_pattern;
use crate::sensors::{lookup_sensor, list_sensors, SensorProfile, DEFAULT_SENSOR_MODEL};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Status code returned by a wait on an event that is not armed.
pub const SIM_STATUS_NOT_ARMED: u32 = 0xFFFF_0001;

const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(5);

/// Scripted outcome for the next frame-event wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Produce a frame after one frame period.
    Ready,
    /// Report a timeout immediately.
    Timeout,
    /// Report an unrecognized event status.
    Unknown(u32),
}

/// Number of calls made to each hardware operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub alloc_region: usize,
    pub free_region: usize,
    pub set_active_region: usize,
    pub start_capture: usize,
    pub stop_capture: usize,
    pub arm_event: usize,
    pub disarm_event: usize,
    pub freeze_frame: usize,
    pub set_color_mode: usize,
}

struct Region {
    descriptor: RegionDescriptor,
    memory: Vec<u8>,
}

struct SimState {
    initialized: bool,
    regions: HashMap<u32, Region>,
    next_region_id: u32,
    active: Option<u32>,
    capturing: bool,
    armed: Option<EventHandle>,
    next_event_id: u64,
    script: VecDeque<SimEvent>,
    frame_period: Duration,
    frames_generated: u64,
    color_mode: ColorMode,
    rejected_modes: Vec<ColorMode>,
    max_region_bytes: Option<usize>,
    exposure_ms: f64,
    gain: u32,
    pixel_clock: u32,
    counters: SimCounters,
}

impl SimState {
    fn require_init(&self) -> Result<(), HwError> {
        if self.initialized {
            Ok(())
        } else {
            Err(HwError::NotInitialized)
        }
    }

    /// Write the next test pattern into the active region, if any.
    fn generate_frame(&mut self) {
        let frame_nr = self.frames_generated;
        self.frames_generated += 1;
        if let Some(region) = self.active.and_then(|id| self.regions.get_mut(&id)) {
            let d = &region.descriptor;
            fill_test_pattern(
                &mut region.memory,
                d.width,
                d.height,
                d.bytes_per_pixel(),
                frame_nr,
            );
        }
    }
}

/// In-memory implementation of [`CameraHardware`].
pub struct SimCamera {
    profile: SensorProfile,
    state: Mutex<SimState>,
    signal: Condvar,
}

impl Default for SimCamera {
    fn default() -> Self {
        let profile = lookup_sensor(DEFAULT_SENSOR_MODEL)
            .or_else(|| list_sensors().first())
            .cloned()
            .unwrap_or_else(fallback_profile);
        Self::new(profile)
    }
}

impl SimCamera {
    pub fn new(profile: SensorProfile) -> Self {
        let (clock_min, _) = profile.timing.pixel_clock_mhz;
        let (exposure_min, _) = profile.timing.exposure_ms;
        Self {
            profile,
            state: Mutex::new(SimState {
                initialized: false,
                regions: HashMap::new(),
                next_region_id: 1,
                active: None,
                capturing: false,
                armed: None,
                next_event_id: 1,
                script: VecDeque::new(),
                frame_period: DEFAULT_FRAME_PERIOD,
                frames_generated: 0,
                color_mode: ColorMode::SensorRaw8,
                rejected_modes: Vec::new(),
                max_region_bytes: None,
                exposure_ms: exposure_min,
                gain: 1,
                pixel_clock: clock_min,
                counters: SimCounters::default(),
            }),
            signal: Condvar::new(),
        }
    }

    /// Simulate the sensor of the given model, if it is in the database.
    pub fn for_model(model: &str) -> Option<Self> {
        lookup_sensor(model).cloned().map(Self::new)
    }

    /// Time between simulated frames.
    pub fn with_frame_period(self, period: Duration) -> Self {
        self.lock().frame_period = period;
        self
    }

    /// Refuse allocations larger than `bytes`.
    pub fn with_max_region_bytes(self, bytes: usize) -> Self {
        self.set_max_region_bytes(Some(bytes));
        self
    }

    /// Reject `mode` in `set_color_mode`.
    pub fn with_rejected_color_mode(self, mode: ColorMode) -> Self {
        self.lock().rejected_modes.push(mode);
        self
    }

    pub fn set_max_region_bytes(&self, bytes: Option<usize>) {
        self.lock().max_region_bytes = bytes;
    }

    /// Queue outcomes for upcoming frame-event waits.
    ///
    /// Once the script is exhausted, waits produce a frame every frame
    /// period while capture is running.
    pub fn push_events(&self, events: impl IntoIterator<Item = SimEvent>) {
        self.lock().script.extend(events);
    }

    pub fn counters(&self) -> SimCounters {
        self.lock().counters.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    pub fn color_mode(&self) -> ColorMode {
        self.lock().color_mode
    }

    pub fn active_region(&self) -> Option<RegionDescriptor> {
        let state = self.lock();
        state
            .active
            .and_then(|id| state.regions.get(&id))
            .map(|r| r.descriptor.clone())
    }

    /// Number of regions currently allocated.
    pub fn region_count(&self) -> usize {
        self.lock().regions.len()
    }

    pub fn profile(&self) -> &SensorProfile {
        &self.profile
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep one frame period, waking early if capture stops or the event
    /// is disarmed.
    fn pace<'a>(
        &self,
        state: MutexGuard<'a, SimState>,
        handle: EventHandle,
    ) -> MutexGuard<'a, SimState> {
        let period = state.frame_period;
        let (state, _) = self
            .signal
            .wait_timeout_while(state, period, |s| {
                s.capturing && s.armed == Some(handle)
            })
            .unwrap_or_else(|e| e.into_inner());
        state
    }
}

impl CameraHardware for SimCamera {
    fn init(&self) -> Result<SensorInfo, HwError> {
        let mut state = self.lock();
        state.initialized = true;
        tracing::debug!(model = %self.profile.sensor.model, "simulated camera initialized");
        Ok(self.profile.sensor_info())
    }

    fn shutdown(&self) -> Result<(), HwError> {
        let mut state = self.lock();
        state.regions.clear();
        state.active = None;
        state.capturing = false;
        state.armed = None;
        state.initialized = false;
        self.signal.notify_all();
        Ok(())
    }

    fn alloc_region(
        &self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<RegionDescriptor, HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.alloc_region += 1;

        let descriptor = RegionDescriptor {
            id: state.next_region_id,
            width,
            height,
            bits_per_pixel,
        };
        let len = descriptor.byte_len();
        if len == 0 {
            return Err(HwError::AllocationFailed(format!(
                "empty region {width}x{height}"
            )));
        }
        if let Some(max) = state.max_region_bytes {
            if len > max {
                return Err(HwError::AllocationFailed(format!(
                    "{len} bytes exceeds the {max} byte limit"
                )));
            }
        }

        state.next_region_id += 1;
        state.regions.insert(
            descriptor.id,
            Region {
                descriptor: descriptor.clone(),
                memory: vec![0; len],
            },
        );
        Ok(descriptor)
    }

    fn free_region(&self, region: &RegionDescriptor) -> Result<(), HwError> {
        let mut state = self.lock();
        state.counters.free_region += 1;
        if state.regions.remove(&region.id).is_none() {
            return Err(HwError::UnknownRegion(region.id));
        }
        if state.active == Some(region.id) {
            state.active = None;
        }
        Ok(())
    }

    fn set_active_region(&self, region: &RegionDescriptor) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.set_active_region += 1;
        if !state.regions.contains_key(&region.id) {
            return Err(HwError::UnknownRegion(region.id));
        }
        state.active = Some(region.id);
        Ok(())
    }

    fn read_region(&self, region: &RegionDescriptor, dst: &mut [u8]) -> Result<(), HwError> {
        let state = self.lock();
        let src = &state
            .regions
            .get(&region.id)
            .ok_or(HwError::UnknownRegion(region.id))?
            .memory;
        let actual = dst.len();
        let dst = dst
            .get_mut(..src.len())
            .ok_or(HwError::BufferTooShort {
                expected: src.len(),
                actual,
            })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn freeze_frame(&self, timeout: Duration) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.freeze_frame += 1;
        if state.capturing {
            return Err(HwError::CaptureFailed("continuous capture running".into()));
        }
        if state.active.is_none() {
            return Err(HwError::NoActiveRegion);
        }
        let period = state.frame_period;
        if period > timeout {
            return Err(HwError::CaptureFailed(format!(
                "no frame within {} ms",
                timeout.as_millis()
            )));
        }
        drop(state);
        std::thread::sleep(period);
        self.lock().generate_frame();
        Ok(())
    }

    fn start_continuous_capture(&self) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.start_capture += 1;
        if state.active.is_none() {
            return Err(HwError::NoActiveRegion);
        }
        state.capturing = true;
        self.signal.notify_all();
        Ok(())
    }

    fn stop_continuous_capture(&self) -> Result<(), HwError> {
        let mut state = self.lock();
        state.counters.stop_capture += 1;
        state.capturing = false;
        self.signal.notify_all();
        Ok(())
    }

    fn arm_frame_event(&self) -> Result<EventHandle, HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.arm_event += 1;
        let handle = EventHandle(state.next_event_id);
        state.next_event_id += 1;
        state.armed = Some(handle);
        Ok(handle)
    }

    fn wait_frame_event(&self, handle: EventHandle, timeout: Duration) -> WaitStatus {
        let state = self.lock();
        if state.armed != Some(handle) {
            return WaitStatus::Unknown(SIM_STATUS_NOT_ARMED);
        }

        let mut state = match state.script.front().copied() {
            Some(SimEvent::Timeout) => {
                let mut state = state;
                state.script.pop_front();
                return WaitStatus::Timeout;
            }
            Some(SimEvent::Unknown(code)) => {
                let mut state = state;
                state.script.pop_front();
                return WaitStatus::Unknown(code);
            }
            Some(SimEvent::Ready) => {
                let mut state = self.pace(state, handle);
                state.script.pop_front();
                state.generate_frame();
                return WaitStatus::Ready;
            }
            None => state,
        };

        if !state.capturing {
            // Nothing will signal until capture starts.
            let (s, _) = self
                .signal
                .wait_timeout_while(state, timeout, |s| {
                    !s.capturing && s.armed == Some(handle)
                })
                .unwrap_or_else(|e| e.into_inner());
            state = s;
            if !state.capturing {
                return WaitStatus::Timeout;
            }
        }

        let mut state = self.pace(state, handle);
        if !state.capturing || state.armed != Some(handle) {
            return WaitStatus::Timeout;
        }
        state.generate_frame();
        WaitStatus::Ready
    }

    fn disarm_frame_event(&self, handle: EventHandle) -> Result<(), HwError> {
        let mut state = self.lock();
        state.counters.disarm_event += 1;
        if state.armed != Some(handle) {
            return Err(HwError::EventNotArmed(handle));
        }
        state.armed = None;
        self.signal.notify_all();
        Ok(())
    }

    fn set_color_mode(&self, mode: ColorMode) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        state.counters.set_color_mode += 1;
        if state.rejected_modes.contains(&mode)
            || !self.profile.supports_bit_depth(mode.bits_per_pixel())
        {
            return Err(HwError::ColorModeRejected(mode));
        }
        state.color_mode = mode;
        Ok(())
    }

    fn set_exposure(&self, exposure_ms: f64) -> Result<f64, HwError> {
        let mut state = self.lock();
        state.require_init()?;
        let (min, max) = self.profile.timing.exposure_ms;
        if !(min..=max).contains(&exposure_ms) {
            return Err(HwError::OutOfRange {
                name: "exposure",
                value: exposure_ms,
            });
        }
        state.exposure_ms = exposure_ms;
        Ok(exposure_ms)
    }

    fn set_gain(&self, gain: u32) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        if !(1..=100).contains(&gain) {
            return Err(HwError::OutOfRange {
                name: "gain",
                value: f64::from(gain),
            });
        }
        state.gain = gain;
        Ok(())
    }

    fn pixel_clock_range(&self) -> Result<(u32, u32), HwError> {
        self.lock().require_init()?;
        Ok(self.profile.timing.pixel_clock_mhz)
    }

    fn pixel_clock(&self) -> Result<u32, HwError> {
        let state = self.lock();
        state.require_init()?;
        Ok(state.pixel_clock)
    }

    fn set_pixel_clock(&self, mhz: u32) -> Result<(), HwError> {
        let mut state = self.lock();
        state.require_init()?;
        let (min, max) = self.profile.timing.pixel_clock_mhz;
        if !(min..=max).contains(&mhz) {
            return Err(HwError::OutOfRange {
                name: "pixel clock",
                value: f64::from(mhz),
            });
        }
        state.pixel_clock = mhz;
        Ok(())
    }
}

/// Profile used only if the embedded database failed to parse.
fn fallback_profile() -> SensorProfile {
    use crate::sensors::{SensorSection, TimingSection};
    SensorProfile {
        sensor: SensorSection {
            model: "SIM".into(),
            name: "Simulated sensor".into(),
            max_width: 640,
            max_height: 480,
            bit_depths: vec![8, 16],
            binning: vec![1, 2],
        },
        timing: TimingSection {
            pixel_clock_mhz: (5, 40),
            exposure_ms: (1.0, 100.0),
        },
    }
}
