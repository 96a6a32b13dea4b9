//! Acquisition controller: the device façade.
//!
//! Owns the frame buffer, the image holder and the property table for as
//! long as the device is initialized, and mediates between configuration
//! changes and the acquisition worker's lifecycle. Capture-affecting
//! changes are refused while a sequence runs; [`AcquisitionController::stop`]
//! returns only after the worker has exited, so a reconfiguration issued
//! right after it never sees a busy device.

use crate::config::CameraConfig;
use crate::error::AcquisitionError;
use crate::frame_buffer::FrameBufferManager;
use crate::image::{lock_image, ImageHolder, SharedImage};
use crate::properties::{
    Property, PropertyError, PropertyKind, PropertyRegistry, PropertyValue, PROP_BINNING,
    PROP_CAMERA_NAME, PROP_EXPOSURE, PROP_FPS, PROP_GAIN, PROP_PIXEL_CLOCK, PROP_PIXEL_TYPE,
};
use crate::session::Session;
use crate::sink::{FrameSink, SinkAdapter};
use crate::types::{PixelType, Roi, SequenceParams};
use crate::worker::{self, WorkerContext, WorkerControl};
use dcxcam_hw::{CameraHardware, Frame, FrameEvent, HwError, SensorInfo};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub const GAIN_RANGE: (u32, u32) = (1, 100);

pub struct AcquisitionController {
    hw: Arc<dyn CameraHardware>,
    sink: Arc<dyn FrameSink>,
    config: CameraConfig,
    session: Arc<Session>,
    control: Arc<WorkerControl>,
    image: SharedImage,
    buffers: FrameBufferManager,
    properties: PropertyRegistry,
    sensor: Option<SensorInfo>,
    binning: u32,
    pixel_type: PixelType,
    roi_x: u32,
    roi_y: u32,
    worker: Option<JoinHandle<Option<AcquisitionError>>>,
}

impl AcquisitionController {
    pub fn new(hw: Arc<dyn CameraHardware>, sink: Arc<dyn FrameSink>, config: CameraConfig) -> Self {
        let session = Arc::new(Session::default());
        let buffers = FrameBufferManager::new(hw.clone(), session.clone());
        Self {
            hw,
            sink,
            binning: config.binning,
            pixel_type: config.pixel_type,
            config,
            session,
            control: Arc::new(WorkerControl::default()),
            image: Arc::new(Mutex::new(ImageHolder::default())),
            buffers,
            properties: PropertyRegistry::default(),
            sensor: None,
            roi_x: 0,
            roi_y: 0,
            worker: None,
        }
    }

    /// Open the device and provision a full-frame buffer. No-op if already
    /// initialized.
    pub fn initialize(&mut self) -> Result<(), AcquisitionError> {
        if self.sensor.is_some() {
            return Ok(());
        }

        let sensor = self.hw.init()?;
        let binning = self.config.binning;
        if !sensor.binning_factors.contains(&binning) {
            return Err(PropertyError::NotAllowed {
                name: PROP_BINNING.into(),
                value: binning.to_string(),
            }
            .into());
        }
        let pixel_type = self.config.pixel_type;
        self.apply_color_mode(&sensor, pixel_type)?;

        let exposure = self.hw.set_exposure(self.config.exposure_ms)?;
        self.hw.set_gain(self.config.gain)?;
        let clock_range = self.hw.pixel_clock_range()?;
        let clock = self.hw.pixel_clock()?;

        let (width, height) = full_frame(&sensor, binning);
        self.configure_geometry(0, 0, width, height, pixel_type)?;
        self.binning = binning;
        self.pixel_type = pixel_type;

        self.properties = build_properties(
            &sensor,
            binning,
            pixel_type,
            exposure,
            self.config.gain,
            clock,
            clock_range,
        );
        tracing::info!(
            camera = %self.config.label,
            model = %sensor.model,
            width,
            height,
            pixel_type = %pixel_type,
            "camera initialized"
        );
        self.sensor = Some(sensor);
        Ok(())
    }

    /// Stop any running sequence, release the frame buffer and close the
    /// device. The controller can be initialized again afterwards.
    pub fn shutdown(&mut self) -> Result<(), AcquisitionError> {
        if self.sensor.is_none() {
            return Ok(());
        }
        self.stop()?;
        self.buffers.release()?;
        lock_image(&self.image).resize(0, 0, self.pixel_type.bit_depth());
        self.hw.shutdown()?;
        self.properties = PropertyRegistry::default();
        self.sensor = None;
        tracing::info!(camera = %self.config.label, "camera shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.sensor.is_some()
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn sensor(&self) -> Option<&SensorInfo> {
        self.sensor.as_ref()
    }

    /// Start a sequence acquisition on a background thread.
    ///
    /// Fails with `DeviceBusy`, without side effects, if one is running.
    pub fn start_sequence(&mut self, params: SequenceParams) -> Result<(), AcquisitionError> {
        self.require_initialized()?;
        self.session.begin()?;

        // The previous worker has already left the session; reap it.
        if let Some(previous) = self.worker.take() {
            if previous.join().is_err() {
                tracing::warn!("previous acquisition worker panicked");
            }
        }

        match self.launch(params) {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start acquisition");
                self.session.begin_stopping();
                self.session.finish();
                Err(e)
            }
        }
    }

    /// Unbounded sequence that clears the sink's queue on overflow.
    pub fn start_continuous(&mut self, interval_ms: f64) -> Result<(), AcquisitionError> {
        self.start_sequence(SequenceParams::continuous(interval_ms))
    }

    /// Stop the running sequence and wait for the worker to exit.
    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.control.request_stop();
        match handle.join() {
            Ok(_) => {
                tracing::debug!(frames = self.control.frames(), "acquisition worker joined");
                Ok(())
            }
            Err(_) => Err(AcquisitionError::WorkerPanicked),
        }
    }

    pub fn is_capturing(&self) -> bool {
        !self.session.is_idle()
    }

    /// Wait for a bounded sequence to end on its own. Returns false if it
    /// is still running after `timeout`.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        if !self.session.wait_idle(timeout) {
            return false;
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("acquisition worker panicked");
            }
        }
        true
    }

    /// Keep capturing but stop handing frames to the sink.
    pub fn suspend(&self) {
        self.control.suspend();
        tracing::debug!("frame delivery suspended");
    }

    pub fn resume(&self) {
        self.control.resume();
        tracing::debug!("frame delivery resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.control.is_suspended()
    }

    /// Frames published in the current or most recent sequence.
    pub fn frames_acquired(&self) -> u64 {
        self.control.frames()
    }

    /// The error that ended the most recent sequence.
    pub fn last_error(&self) -> Option<AcquisitionError> {
        self.control.last_error()
    }

    pub fn fps(&self) -> f64 {
        self.control.fps()
    }

    /// Capture one frame synchronously into the image holder.
    pub fn snap_image(&mut self) -> Result<(), AcquisitionError> {
        self.require_initialized()?;
        self.ensure_idle()?;
        let region = self
            .buffers
            .active()
            .cloned()
            .ok_or(AcquisitionError::NotConfigured)?;
        if !lock_image(&self.image).matches(&region) {
            return Err(AcquisitionError::NotConfigured);
        }

        self.hw.freeze_frame(self.config.snap_timeout())?;
        let mut pixels = vec![0u8; region.byte_len()];
        self.hw.read_region(&region, &mut pixels)?;
        lock_image(&self.image).copy_from(&pixels)?;
        tracing::debug!(region = region.id, "snapped image");
        Ok(())
    }

    /// Copy of the most recently captured frame.
    pub fn image_buffer(&self) -> Frame {
        lock_image(&self.image).snapshot()
    }

    pub fn image_width(&self) -> u32 {
        lock_image(&self.image).width()
    }

    pub fn image_height(&self) -> u32 {
        lock_image(&self.image).height()
    }

    pub fn image_bytes_per_pixel(&self) -> u32 {
        lock_image(&self.image).bytes_per_pixel()
    }

    pub fn bit_depth(&self) -> u32 {
        lock_image(&self.image).bit_depth()
    }

    pub fn image_buffer_size(&self) -> usize {
        lock_image(&self.image).buffer_size()
    }

    pub fn number_of_components(&self) -> u32 {
        lock_image(&self.image).components()
    }

    /// Restrict capture to a region of the binned sensor. A zero width and
    /// height clears the ROI.
    pub fn set_roi(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<(), AcquisitionError> {
        if width == 0 && height == 0 {
            return self.clear_roi();
        }
        self.require_initialized()?;
        self.ensure_idle()?;
        let (max_w, max_h) = self.full_frame()?;
        let fits = width > 0
            && height > 0
            && x.checked_add(width).is_some_and(|r| r <= max_w)
            && y.checked_add(height).is_some_and(|b| b <= max_h);
        if !fits {
            return Err(AcquisitionError::InvalidRoi(format!(
                "{width}x{height}+{x}+{y} outside {max_w}x{max_h}"
            )));
        }
        self.configure_geometry(x, y, width, height, self.pixel_type)
    }

    pub fn roi(&self) -> Roi {
        let image = lock_image(&self.image);
        Roi {
            x: self.roi_x,
            y: self.roi_y,
            width: image.width(),
            height: image.height(),
        }
    }

    /// Capture the full binned sensor area again.
    pub fn clear_roi(&mut self) -> Result<(), AcquisitionError> {
        self.require_initialized()?;
        self.ensure_idle()?;
        let (width, height) = self.full_frame()?;
        self.configure_geometry(0, 0, width, height, self.pixel_type)
    }

    pub fn binning(&self) -> u32 {
        self.binning
    }

    /// Change binning. Resets the ROI to the full binned frame.
    pub fn set_binning(&mut self, binning: u32) -> Result<(), AcquisitionError> {
        self.set_property(PROP_BINNING, binning.into())
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn set_pixel_type(&mut self, pixel_type: PixelType) -> Result<(), AcquisitionError> {
        self.set_property(PROP_PIXEL_TYPE, pixel_type.as_str().into())
    }

    /// Like [`Self::set_pixel_type`], from the property's string form.
    pub fn set_pixel_type_str(&mut self, pixel_type: &str) -> Result<(), AcquisitionError> {
        self.set_pixel_type(pixel_type.parse()?)
    }

    pub fn exposure(&self) -> f64 {
        self.properties
            .value(PROP_EXPOSURE)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(self.config.exposure_ms)
    }

    /// Exposure in milliseconds. Allowed while capturing.
    pub fn set_exposure(&mut self, exposure_ms: f64) -> Result<(), AcquisitionError> {
        self.set_property(PROP_EXPOSURE, exposure_ms.into())
    }

    pub fn gain(&self) -> u32 {
        self.int_property(PROP_GAIN).unwrap_or(self.config.gain)
    }

    pub fn set_gain(&mut self, gain: u32) -> Result<(), AcquisitionError> {
        self.set_property(PROP_GAIN, gain.into())
    }

    pub fn pixel_clock(&self) -> Result<u32, AcquisitionError> {
        self.require_initialized()?;
        Ok(self.hw.pixel_clock()?)
    }

    pub fn set_pixel_clock(&mut self, mhz: u32) -> Result<(), AcquisitionError> {
        self.set_property(PROP_PIXEL_CLOCK, mhz.into())
    }

    pub fn property(&self, name: &str) -> Result<Property, AcquisitionError> {
        self.require_initialized()?;
        let mut prop = self.properties.get(name)?.clone();
        self.refresh(&mut prop);
        Ok(prop)
    }

    pub fn properties(&self) -> Vec<Property> {
        self.properties
            .iter()
            .cloned()
            .map(|mut p| {
                self.refresh(&mut p);
                p
            })
            .collect()
    }

    /// Validate and apply a property change.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), AcquisitionError> {
        self.require_initialized()?;
        let value = self
            .properties
            .validate_set(name, &value, self.is_capturing())
            .map_err(|e| match e {
                AcquisitionError::Property(PropertyError::NotAllowed { value, .. }) if name == PROP_PIXEL_TYPE => {
                    AcquisitionError::UnsupportedPixelFormat(value)
                }
                e => e.into(),
            })?;

        match name {
            PROP_BINNING => {
                let binning = int_value(name, &value)?;
                self.apply_binning(binning)?;
            }
            PROP_PIXEL_TYPE => {
                let pixel_type: PixelType = value.as_str().unwrap_or_default().parse()?;
                self.apply_pixel_type(pixel_type)?;
            }
            PROP_EXPOSURE => {
                let requested = value.as_f64().unwrap_or_default();
                let actual = self.hw.set_exposure(requested)?;
                self.properties.store(name, actual);
                tracing::debug!(requested, actual, "exposure set");
            }
            PROP_GAIN => {
                let gain = int_value(name, &value)?;
                self.hw.set_gain(gain)?;
                self.properties.store(name, gain);
            }
            PROP_PIXEL_CLOCK => {
                let mhz = int_value(name, &value)?;
                self.hw.set_pixel_clock(mhz)?;
                self.properties.store(name, mhz);
                tracing::debug!(mhz, "pixel clock set");
            }
            _ => self.properties.store(name, value),
        }
        Ok(())
    }

    fn launch(
        &mut self,
        params: SequenceParams,
    ) -> Result<JoinHandle<Option<AcquisitionError>>, AcquisitionError> {
        let region = self
            .buffers
            .active()
            .cloned()
            .ok_or(AcquisitionError::NotConfigured)?;
        let bit_depth = {
            let image = lock_image(&self.image);
            if !image.matches(&region) {
                return Err(AcquisitionError::NotConfigured);
            }
            image.bit_depth()
        };

        self.control.reset();
        let sink = SinkAdapter::new(self.sink.clone(), self.config.label.clone(), params.overflow);
        sink.prepare()?;

        let event = FrameEvent::arm(self.hw.clone())?;
        if let Err(e) = self.hw.start_continuous_capture() {
            if let Err(disarm) = event.disarm() {
                tracing::warn!(error = %disarm, "failed to disarm frame event");
            }
            return Err(e.into());
        }

        let ctx = WorkerContext {
            hw: self.hw.clone(),
            event,
            region,
            image: self.image.clone(),
            sink,
            session: self.session.clone(),
            control: self.control.clone(),
            params,
            event_timeout: self.config.event_timeout(),
            label: self.config.label.clone(),
            roi_x: self.roi_x,
            roi_y: self.roi_y,
            bit_depth,
        };
        worker::spawn(ctx)
    }

    fn apply_binning(&mut self, binning: u32) -> Result<(), AcquisitionError> {
        let sensor = self.sensor.as_ref().ok_or(AcquisitionError::NotInitialized)?;
        let (width, height) = full_frame(sensor, binning);
        self.configure_geometry(0, 0, width, height, self.pixel_type)?;
        self.binning = binning;
        self.properties.store(PROP_BINNING, binning);
        tracing::info!(binning, width, height, "binning changed");
        Ok(())
    }

    fn apply_pixel_type(&mut self, pixel_type: PixelType) -> Result<(), AcquisitionError> {
        let sensor = self.sensor.clone().ok_or(AcquisitionError::NotInitialized)?;
        self.apply_color_mode(&sensor, pixel_type)?;

        let roi = self.roi();
        if let Err(e) = self.configure_geometry(roi.x, roi.y, roi.width, roi.height, pixel_type) {
            if let Err(restore) = self.hw.set_color_mode(self.pixel_type.color_mode()) {
                tracing::error!(error = %restore, "failed to restore color mode");
            }
            return Err(e);
        }
        self.pixel_type = pixel_type;
        self.properties.store(PROP_PIXEL_TYPE, pixel_type.as_str());
        tracing::info!(pixel_type = %pixel_type, "pixel type changed");
        Ok(())
    }

    fn apply_color_mode(&self, sensor: &SensorInfo, pixel_type: PixelType) -> Result<(), AcquisitionError> {
        let unsupported = || AcquisitionError::UnsupportedPixelFormat(pixel_type.as_str().into());
        if !sensor.bit_depths.contains(&pixel_type.bit_depth()) {
            return Err(unsupported());
        }
        self.hw
            .set_color_mode(pixel_type.color_mode())
            .map_err(|e| match e {
                HwError::ColorModeRejected(_) => unsupported(),
                other => other.into(),
            })
    }

    /// Re-provision the frame buffer and resize the image holder. Fields
    /// are only updated once both succeed.
    fn configure_geometry(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixel_type: PixelType,
    ) -> Result<(), AcquisitionError> {
        let bits = pixel_type.bit_depth();
        let region = self.buffers.configure(width, height, bits)?;
        lock_image(&self.image).resize(region.width, region.height, bits);
        self.roi_x = x;
        self.roi_y = y;
        tracing::debug!(x, y, width, height, bits, "geometry configured");
        Ok(())
    }

    fn full_frame(&self) -> Result<(u32, u32), AcquisitionError> {
        let sensor = self.sensor.as_ref().ok_or(AcquisitionError::NotInitialized)?;
        Ok(full_frame(sensor, self.binning))
    }

    fn refresh(&self, prop: &mut Property) {
        if prop.name == PROP_FPS {
            prop.value = PropertyValue::Float(self.control.fps());
        }
    }

    fn int_property(&self, name: &str) -> Option<u32> {
        self.properties
            .value(name)
            .ok()
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
    }

    fn require_initialized(&self) -> Result<(), AcquisitionError> {
        if self.sensor.is_some() {
            Ok(())
        } else {
            Err(AcquisitionError::NotInitialized)
        }
    }

    fn ensure_idle(&self) -> Result<(), AcquisitionError> {
        if self.session.is_idle() {
            Ok(())
        } else {
            Err(AcquisitionError::DeviceBusy("sequence acquisition running"))
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop acquisition on drop");
        }
    }
}

fn full_frame(sensor: &SensorInfo, binning: u32) -> (u32, u32) {
    let binning = binning.max(1);
    (sensor.max_width / binning, sensor.max_height / binning)
}

fn int_value(name: &str, value: &PropertyValue) -> Result<u32, AcquisitionError> {
    value
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: PropertyKind::Integer,
                value: value.clone(),
            }
            .into()
        })
}

fn build_properties(
    sensor: &SensorInfo,
    binning: u32,
    pixel_type: PixelType,
    exposure_ms: f64,
    gain: u32,
    pixel_clock: u32,
    pixel_clock_range: (u32, u32),
) -> PropertyRegistry {
    let (exp_min, exp_max) = sensor.exposure_range_ms;
    let (clock_min, clock_max) = pixel_clock_range;
    let pixel_types = PixelType::ALL
        .into_iter()
        .filter(|p| sensor.bit_depths.contains(&p.bit_depth()))
        .map(PixelType::as_str);

    let mut reg = PropertyRegistry::default();
    reg.define(Property::new(PROP_CAMERA_NAME, PropertyKind::String, sensor.name.as_str()).read_only());
    reg.define(
        Property::new(PROP_BINNING, PropertyKind::Integer, binning)
            .capture_affecting()
            .with_allowed(&sensor.binning_factors),
    );
    reg.define(
        Property::new(PROP_PIXEL_TYPE, PropertyKind::Enum, pixel_type.as_str())
            .capture_affecting()
            .with_allowed(pixel_types),
    );
    reg.define(
        Property::new(PROP_EXPOSURE, PropertyKind::Float, exposure_ms).with_limits(exp_min, exp_max),
    );
    reg.define(
        Property::new(PROP_GAIN, PropertyKind::Integer, gain)
            .with_limits(f64::from(GAIN_RANGE.0), f64::from(GAIN_RANGE.1)),
    );
    reg.define(
        Property::new(PROP_PIXEL_CLOCK, PropertyKind::Integer, pixel_clock)
            .with_limits(f64::from(clock_min), f64::from(clock_max)),
    );
    reg.define(Property::new(PROP_FPS, PropertyKind::Float, 0.0).read_only());
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{KEY_ELAPSED_TIME, KEY_IMAGE_NUMBER, KEY_ROI_X};
    use crate::sink::{InsertStatus, SinkError};
    use dcxcam_hw::{SimCamera, SimEvent};
    use std::time::Instant;

    #[derive(Debug, Clone)]
    struct Published {
        image_number: u64,
        elapsed_ms: f64,
        roi_x: String,
        process: bool,
    }

    /// Records every insert. Optionally reports overflow on every n-th
    /// processed insert.
    #[derive(Default)]
    struct RecordingSink {
        overflow_every: Option<u64>,
        panic_on_finish: bool,
        state: Mutex<RecordingState>,
    }

    #[derive(Default)]
    struct RecordingState {
        attempts: u64,
        published: Vec<Published>,
        clears: u64,
        finished: Vec<Option<AcquisitionError>>,
    }

    impl RecordingSink {
        fn overflowing_every(n: u64) -> Self {
            Self {
                overflow_every: Some(n),
                ..Self::default()
            }
        }

        fn panicking_on_finish() -> Self {
            Self {
                panic_on_finish: true,
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<Published> {
            self.state.lock().unwrap().published.clone()
        }

        fn clears(&self) -> u64 {
            self.state.lock().unwrap().clears
        }

        fn finished(&self) -> Vec<Option<AcquisitionError>> {
            self.state.lock().unwrap().finished.clone()
        }
    }

    impl FrameSink for RecordingSink {
        fn prepare_for_acquisition(&self, _camera: &str) -> Result<(), SinkError> {
            Ok(())
        }

        fn insert_image(
            &self,
            _camera: &str,
            _frame: &Frame,
            metadata: &str,
            process: bool,
        ) -> Result<InsertStatus, SinkError> {
            let mut state = self.state.lock().unwrap();
            if process {
                state.attempts += 1;
                if self.overflow_every.is_some_and(|n| state.attempts % n == 0) {
                    return Ok(InsertStatus::Overflow);
                }
            }
            let md: serde_json::Value = serde_json::from_str(metadata).unwrap();
            state.published.push(Published {
                image_number: md[KEY_IMAGE_NUMBER].as_str().unwrap().parse().unwrap(),
                elapsed_ms: md[KEY_ELAPSED_TIME].as_str().unwrap().parse().unwrap(),
                roi_x: md[KEY_ROI_X].as_str().unwrap().to_string(),
                process,
            });
            Ok(InsertStatus::Accepted)
        }

        fn clear_image_queue(&self, _camera: &str) {
            self.state.lock().unwrap().clears += 1;
        }

        fn acquisition_finished(&self, _camera: &str, error: Option<&AcquisitionError>) {
            if self.panic_on_finish {
                panic!("sink failed to finish");
            }
            self.state.lock().unwrap().finished.push(error.cloned());
        }
    }

    fn controller_with(sink: RecordingSink) -> (Arc<SimCamera>, Arc<RecordingSink>, AcquisitionController) {
        let sim = Arc::new(SimCamera::default());
        let sink = Arc::new(sink);
        let mut ctl = AcquisitionController::new(sim.clone(), sink.clone(), CameraConfig::default());
        ctl.initialize().unwrap();
        (sim, sink, ctl)
    }

    fn controller() -> (Arc<SimCamera>, Arc<RecordingSink>, AcquisitionController) {
        controller_with(RecordingSink::default())
    }

    fn wait_done(ctl: &mut AcquisitionController) {
        assert!(ctl.wait_for_completion(Duration::from_secs(10)));
        assert!(!ctl.is_capturing());
    }

    #[test]
    fn test_initialize_provisions_full_frame() {
        let (sim, _sink, ctl) = controller();
        let sensor = sim.profile().sensor_info();
        assert_eq!(ctl.image_width(), sensor.max_width);
        assert_eq!(ctl.image_height(), sensor.max_height);
        assert_eq!(ctl.image_bytes_per_pixel(), 1);
        assert_eq!(ctl.bit_depth(), 8);
        assert_eq!(ctl.number_of_components(), 1);
        assert_eq!(
            ctl.image_buffer_size(),
            (sensor.max_width * sensor.max_height) as usize
        );
        assert_eq!(sim.region_count(), 1);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (sim, _sink, mut ctl) = controller();
        ctl.initialize().unwrap();
        assert_eq!(sim.counters().alloc_region, 1);
    }

    #[test]
    fn test_not_initialized() {
        let sim = Arc::new(SimCamera::default());
        let mut ctl =
            AcquisitionController::new(sim, Arc::new(RecordingSink::default()), CameraConfig::default());
        assert_eq!(
            ctl.start_sequence(SequenceParams::new(1, 0.0, true)),
            Err(AcquisitionError::NotInitialized)
        );
        assert_eq!(ctl.snap_image(), Err(AcquisitionError::NotInitialized));
    }

    #[test]
    fn test_five_frames_indexed_in_order() {
        let (sim, sink, mut ctl) = controller();
        sim.push_events([SimEvent::Ready; 5]);
        ctl.start_sequence(SequenceParams::new(5, 0.0, true)).unwrap();
        wait_done(&mut ctl);

        let published = sink.published();
        assert_eq!(published.len(), 5);
        let indices: Vec<u64> = published.iter().map(|p| p.image_number).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(published
            .windows(2)
            .all(|w| w[1].elapsed_ms > w[0].elapsed_ms));
        assert!(published.iter().all(|p| p.process));
        assert_eq!(ctl.frames_acquired(), 5);
        assert_eq!(ctl.last_error(), None);
        assert_eq!(sink.finished(), vec![None]);
    }

    #[test]
    fn test_start_while_running_is_busy() {
        let (sim, _sink, mut ctl) = controller();
        ctl.start_continuous(0.0).unwrap();
        assert!(ctl.is_capturing());
        assert!(matches!(
            ctl.start_sequence(SequenceParams::new(3, 0.0, true)),
            Err(AcquisitionError::DeviceBusy(_))
        ));
        assert_eq!(sim.counters().arm_event, 1);
        assert_eq!(sim.counters().start_capture, 1);
        ctl.stop().unwrap();
    }

    #[test]
    fn test_stop_then_reconfigure() {
        let (sim, _sink, mut ctl) = controller();
        ctl.start_continuous(0.0).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        ctl.stop().unwrap();

        assert!(!ctl.is_capturing());
        assert!(!sim.is_capturing());
        ctl.set_pixel_type(PixelType::Mono16).unwrap();
        assert_eq!(ctl.image_bytes_per_pixel(), 2);
        assert_eq!(ctl.bit_depth(), 16);
        let counters = sim.counters();
        assert_eq!(counters.stop_capture, 1);
        assert_eq!(counters.disarm_event, 1);
    }

    #[test]
    fn test_overflow_drop_and_continue() {
        let (_sim, sink, mut ctl) = controller_with(RecordingSink::overflowing_every(3));
        ctl.start_sequence(SequenceParams::new(9, 0.0, false)).unwrap();
        wait_done(&mut ctl);

        assert_eq!(ctl.last_error(), None);
        assert_eq!(ctl.frames_acquired(), 9);
        assert_eq!(sink.clears(), 3);
        let published = sink.published();
        assert_eq!(published.len(), 9);
        assert_eq!(published.iter().filter(|p| !p.process).count(), 3);
        let indices: Vec<u64> = published.iter().map(|p| p.image_number).collect();
        assert_eq!(indices, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflow_stops_session() {
        let (sim, sink, mut ctl) = controller_with(RecordingSink::overflowing_every(3));
        ctl.start_sequence(SequenceParams::new(9, 0.0, true)).unwrap();
        wait_done(&mut ctl);

        assert_eq!(ctl.last_error(), Some(AcquisitionError::PublishOverflow));
        assert_eq!(ctl.frames_acquired(), 2);
        assert_eq!(sink.published().len(), 2);
        assert_eq!(sink.clears(), 0);
        assert_eq!(sink.finished(), vec![Some(AcquisitionError::PublishOverflow)]);
        assert!(!sim.is_capturing());
    }

    #[test]
    fn test_single_timeout() {
        let (sim, sink, mut ctl) = controller();
        sim.push_events([SimEvent::Timeout]);
        ctl.start_sequence(SequenceParams::new(5, 0.0, true)).unwrap();
        wait_done(&mut ctl);

        let expected = AcquisitionError::CaptureTimeout { timeout_ms: 2000 };
        assert_eq!(ctl.last_error(), Some(expected.clone()));
        assert_eq!(sink.finished(), vec![Some(expected)]);
        assert!(sink.published().is_empty());
        let counters = sim.counters();
        assert_eq!(counters.stop_capture, 1);
        assert_eq!(counters.disarm_event, 1);
    }

    #[test]
    fn test_unknown_event() {
        let (sim, _sink, mut ctl) = controller();
        sim.push_events([SimEvent::Ready, SimEvent::Unknown(0x42)]);
        ctl.start_sequence(SequenceParams::new(5, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert_eq!(ctl.last_error(), Some(AcquisitionError::UnknownEvent(0x42)));
        assert_eq!(ctl.frames_acquired(), 1);
    }

    #[test]
    fn test_restart_after_error() {
        let (sim, sink, mut ctl) = controller();
        sim.push_events([SimEvent::Timeout]);
        ctl.start_sequence(SequenceParams::new(2, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert!(ctl.last_error().is_some());

        ctl.start_sequence(SequenceParams::new(2, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert_eq!(ctl.last_error(), None);
        assert_eq!(ctl.frames_acquired(), 2);
        assert_eq!(sink.finished().len(), 2);
    }

    #[test]
    fn test_reconfigure_while_running_is_busy() {
        let (sim, _sink, mut ctl) = controller();
        let before = (ctl.image_width(), ctl.image_height(), ctl.image_bytes_per_pixel());
        ctl.start_continuous(0.0).unwrap();

        assert!(matches!(
            ctl.set_pixel_type(PixelType::Mono16),
            Err(AcquisitionError::DeviceBusy(_))
        ));
        assert!(matches!(ctl.set_binning(2), Err(AcquisitionError::DeviceBusy(_))));
        assert!(matches!(
            ctl.set_roi(0, 0, 64, 64),
            Err(AcquisitionError::DeviceBusy(_))
        ));
        assert!(matches!(ctl.snap_image(), Err(AcquisitionError::DeviceBusy(_))));
        assert_eq!(
            (ctl.image_width(), ctl.image_height(), ctl.image_bytes_per_pixel()),
            before
        );
        assert_eq!(ctl.pixel_type(), PixelType::Mono8);
        assert_eq!(sim.counters().alloc_region, 1);

        // Exposure and gain are not capture-affecting.
        ctl.set_exposure(20.0).unwrap();
        ctl.set_gain(10).unwrap();
        ctl.stop().unwrap();
        assert_eq!(ctl.exposure(), 20.0);
        assert_eq!(ctl.gain(), 10);
    }

    #[test]
    fn test_allocation_failure_keeps_configuration() {
        let (sim, _sink, mut ctl) = controller();
        let (w, h) = (ctl.image_width(), ctl.image_height());
        sim.set_max_region_bytes(Some((w * h) as usize));

        assert!(matches!(
            ctl.set_pixel_type(PixelType::Mono16),
            Err(AcquisitionError::Allocation(_))
        ));
        assert_eq!(ctl.pixel_type(), PixelType::Mono8);
        assert_eq!((ctl.image_width(), ctl.image_height(), ctl.bit_depth()), (w, h, 8));
        assert_eq!(sim.color_mode(), PixelType::Mono8.color_mode());
        assert_eq!(sim.region_count(), 1);

        // The restored buffer still captures.
        ctl.snap_image().unwrap();
    }

    #[test]
    fn test_rejected_color_mode() {
        let sim = Arc::new(SimCamera::default().with_rejected_color_mode(PixelType::Mono16.color_mode()));
        let mut ctl =
            AcquisitionController::new(sim, Arc::new(RecordingSink::default()), CameraConfig::default());
        ctl.initialize().unwrap();
        assert_eq!(
            ctl.set_pixel_type(PixelType::Mono16),
            Err(AcquisitionError::UnsupportedPixelFormat("16bit".into()))
        );
        assert_eq!(ctl.pixel_type(), PixelType::Mono8);
        assert!(matches!(
            ctl.set_pixel_type_str("32bitRGB"),
            Err(AcquisitionError::UnsupportedPixelFormat(_))
        ));
    }

    #[test]
    fn test_pixel_type_property_outside_allowed_values() {
        let (_sim, _sink, mut ctl) = controller();
        assert_eq!(
            ctl.set_property(PROP_PIXEL_TYPE, "32bitRGB".into()),
            Err(AcquisitionError::UnsupportedPixelFormat("32bitRGB".into()))
        );
        assert_eq!(ctl.pixel_type(), PixelType::Mono8);
    }

    #[test]
    fn test_sink_panic_on_finish_leaves_controller_usable() {
        let (sim, _sink, mut ctl) = controller_with(RecordingSink::panicking_on_finish());
        ctl.start_sequence(SequenceParams::new(2, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert_eq!(ctl.stop(), Ok(()));
        assert_eq!(ctl.frames_acquired(), 2);
        assert_eq!(ctl.last_error(), None);
        assert!(!sim.is_capturing());

        ctl.set_pixel_type(PixelType::Mono16).unwrap();
        ctl.start_sequence(SequenceParams::new(1, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert_eq!(ctl.frames_acquired(), 1);
    }

    #[test]
    fn test_snap_image() {
        let (sim, _sink, mut ctl) = controller();
        ctl.set_roi(0, 0, 64, 32).unwrap();
        ctl.snap_image().unwrap();
        let frame = ctl.image_buffer();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert!(frame.data.iter().any(|&p| p != 0));
        assert_eq!(sim.counters().freeze_frame, 1);
        assert_eq!(sim.counters().start_capture, 0);
    }

    #[test]
    fn test_roi_round_trip() {
        let (_sim, sink, mut ctl) = controller();
        ctl.set_roi(10, 20, 100, 50).unwrap();
        assert_eq!(
            ctl.roi(),
            Roi {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            }
        );
        assert_eq!(ctl.image_buffer_size(), 100 * 50);

        ctl.start_sequence(SequenceParams::new(1, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        assert_eq!(sink.published()[0].roi_x, "10");

        assert!(matches!(
            ctl.set_roi(1200, 0, 100, 10),
            Err(AcquisitionError::InvalidRoi(_))
        ));
        assert_eq!(ctl.roi().width, 100);

        ctl.set_roi(0, 0, 0, 0).unwrap();
        let sensor = ctl.sensor().unwrap().clone();
        assert_eq!(
            ctl.roi(),
            Roi {
                x: 0,
                y: 0,
                width: sensor.max_width,
                height: sensor.max_height
            }
        );
    }

    #[test]
    fn test_binning_resets_roi() {
        let sim = Arc::new(SimCamera::for_model("DCC3240M").unwrap());
        let mut ctl =
            AcquisitionController::new(sim, Arc::new(RecordingSink::default()), CameraConfig::default());
        ctl.initialize().unwrap();
        ctl.set_roi(8, 8, 64, 64).unwrap();
        ctl.set_binning(2).unwrap();
        assert_eq!(ctl.binning(), 2);
        assert_eq!(ctl.roi(), Roi { x: 0, y: 0, width: 640, height: 512 });
        assert!(matches!(
            ctl.set_binning(3),
            Err(AcquisitionError::Property(PropertyError::NotAllowed { .. }))
        ));
    }

    #[test]
    fn test_suspend_holds_back_frames() {
        let (_sim, sink, mut ctl) = controller();
        ctl.start_continuous(0.0).unwrap();
        ctl.suspend();
        std::thread::sleep(Duration::from_millis(20));
        let held = sink.published().len();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.published().len(), held);
        assert!(ctl.is_capturing());

        ctl.resume();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.published().len() <= held && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.published().len() > held);
        ctl.stop().unwrap();
    }

    #[test]
    fn test_properties() {
        let (_sim, _sink, mut ctl) = controller();
        let names: Vec<&str> = ctl.properties().iter().map(|p| p.name).collect();
        for name in [
            PROP_CAMERA_NAME,
            PROP_BINNING,
            PROP_PIXEL_TYPE,
            PROP_EXPOSURE,
            PROP_GAIN,
            PROP_PIXEL_CLOCK,
            PROP_FPS,
        ] {
            assert!(names.contains(&name), "missing {name}");
        }

        assert!(matches!(
            ctl.set_property(PROP_CAMERA_NAME, "other".into()),
            Err(AcquisitionError::Property(PropertyError::ReadOnly(_)))
        ));
        assert!(matches!(
            ctl.set_property(PROP_GAIN, 0u32.into()),
            Err(AcquisitionError::Property(PropertyError::OutOfRange { .. }))
        ));
        ctl.set_property(PROP_PIXEL_TYPE, "16bit".into()).unwrap();
        assert_eq!(ctl.pixel_type(), PixelType::Mono16);
        assert_eq!(
            ctl.property(PROP_PIXEL_TYPE).unwrap().value,
            PropertyValue::Text("16bit".into())
        );

        let (min, _) = ctl.property(PROP_PIXEL_CLOCK).unwrap().limits.unwrap();
        ctl.set_pixel_clock(min as u32 + 1).unwrap();
        assert_eq!(ctl.pixel_clock().unwrap(), min as u32 + 1);
    }

    #[test]
    fn test_fps_measured() {
        let (_sim, _sink, mut ctl) = controller();
        ctl.start_sequence(SequenceParams::new(5, 0.0, true)).unwrap();
        wait_done(&mut ctl);
        let fps = ctl.property(PROP_FPS).unwrap().value.as_f64().unwrap();
        assert!(fps > 0.0);
        assert_eq!(fps, ctl.fps());
    }

    #[test]
    fn test_shutdown_and_reinitialize() {
        let (sim, _sink, mut ctl) = controller();
        ctl.start_continuous(0.0).unwrap();
        ctl.shutdown().unwrap();
        assert!(!ctl.is_initialized());
        assert!(!ctl.is_capturing());
        assert_eq!(sim.region_count(), 0);
        assert_eq!(ctl.property(PROP_EXPOSURE), Err(AcquisitionError::NotInitialized));

        ctl.initialize().unwrap();
        assert_eq!(sim.region_count(), 1);
        ctl.snap_image().unwrap();
    }

    #[test]
    fn test_drop_stops_worker() {
        let (sim, _sink, mut ctl) = controller();
        ctl.start_continuous(0.0).unwrap();
        drop(ctl);
        assert!(!sim.is_capturing());
        assert_eq!(sim.counters().disarm_event, 1);
    }
}
