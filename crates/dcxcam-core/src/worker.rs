//! Acquisition worker: the background thread that moves frames from the
//! device to the frame sink.
//!
//! The controller arms the frame event and starts continuous capture, then
//! hands everything the loop needs to [`spawn`]. The worker owns the armed
//! event for the rest of the session and tears the session down itself,
//! whatever ended the loop.

use crate::error::AcquisitionError;
use crate::image::{lock_image, SharedImage};
use crate::metadata::MetadataRecord;
use crate::session::Session;
use crate::sink::{PublishOutcome, SinkAdapter};
use crate::types::SequenceParams;
use chrono::{DateTime, Utc};
use dcxcam_hw::{CameraHardware, Frame, FrameEvent, RegionDescriptor, WaitStatus};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Flags and counters shared between the controller and a running worker.
#[derive(Debug, Default)]
pub struct WorkerControl {
    stop: AtomicBool,
    suspend: AtomicBool,
    frames: AtomicU64,
    fps_bits: AtomicU64,
    last_error: Mutex<Option<AcquisitionError>>,
}

impl WorkerControl {
    /// Ask the worker to leave its loop at the next iteration boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Keep capturing but stop publishing frames.
    pub fn suspend(&self) {
        self.suspend.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspend.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::SeqCst)
    }

    /// Frames published in the current or most recent session.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Most recent measured frame rate, in frames per second.
    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    /// Error that ended the most recent session, if any.
    pub fn last_error(&self) -> Option<AcquisitionError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Clear all state ahead of a new session.
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.suspend.store(false, Ordering::SeqCst);
        self.frames.store(0, Ordering::SeqCst);
        self.fps_bits.store(0f64.to_bits(), Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn record_interval(&self, interval: Duration) {
        let secs = interval.as_secs_f64();
        let fps = if secs > 0.0 { 1.0 / secs } else { 0.0 };
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn set_last_error(&self, error: Option<AcquisitionError>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }
}

/// Everything one session's worker needs.
pub struct WorkerContext {
    pub hw: Arc<dyn CameraHardware>,
    pub event: FrameEvent,
    pub region: RegionDescriptor,
    pub image: SharedImage,
    pub sink: SinkAdapter,
    pub session: Arc<Session>,
    pub control: Arc<WorkerControl>,
    pub params: SequenceParams,
    pub event_timeout: Duration,
    pub label: String,
    pub roi_x: u32,
    pub roi_y: u32,
    pub bit_depth: u32,
}

/// Start the worker thread.
///
/// The thread's result is the error that ended the session, also stored in
/// [`WorkerControl::last_error`]. If the thread cannot be created, the
/// session is torn down here with `WorkerSpawn` as its error.
pub fn spawn(ctx: WorkerContext) -> Result<JoinHandle<Option<AcquisitionError>>, AcquisitionError> {
    spawn_with(std::thread::Builder::new().name("dcxcam-acq".into()), ctx)
}

fn spawn_with(
    builder: std::thread::Builder,
    ctx: WorkerContext,
) -> Result<JoinHandle<Option<AcquisitionError>>, AcquisitionError> {
    // A failed spawn drops the closure, so the context is parked where
    // this side can take it back and tear down in order.
    let slot = Arc::new(Mutex::new(Some(ctx)));
    let thread_slot = slot.clone();
    let spawned = builder.spawn(move || {
        let ctx = thread_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        ctx.and_then(WorkerContext::run)
    });

    match spawned {
        Ok(handle) => Ok(handle),
        Err(e) => {
            let err = AcquisitionError::WorkerSpawn(e.to_string());
            tracing::error!(error = %e, "failed to spawn acquisition worker");
            let ctx = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(ctx) = ctx {
                ctx.finish(Some(err.clone()));
            }
            Err(err)
        }
    }
}

impl WorkerContext {
    fn run(mut self) -> Option<AcquisitionError> {
        let start_time = Utc::now();
        let started = Instant::now();
        tracing::info!(
            camera = %self.label,
            frames = ?self.params.frame_count,
            interval_ms = self.params.interval_hint.as_millis() as u64,
            overflow = ?self.params.overflow,
            "acquisition started"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.acquire(start_time, started)));
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => {
                tracing::error!(camera = %self.label, "acquisition loop panicked");
                Some(AcquisitionError::WorkerPanicked)
            }
        };
        self.finish(error)
    }

    fn acquire(&mut self, start_time: DateTime<Utc>, started: Instant) -> Result<(), AcquisitionError> {
        let mut scratch = Frame::new(self.region.width, self.region.height, self.bit_depth);
        let mut produced: u64 = 0;
        let mut last_frame = started;

        loop {
            if self.control.stop_requested() {
                tracing::debug!(produced, "stop requested");
                return Ok(());
            }
            if self.params.frame_count.is_exhausted(produced) {
                return Ok(());
            }

            match self.event.wait(self.event_timeout) {
                WaitStatus::Ready => {}
                WaitStatus::Timeout => {
                    let timeout_ms = self.event_timeout.as_millis() as u64;
                    tracing::warn!(produced, timeout_ms, "frame event timed out");
                    return Err(AcquisitionError::CaptureTimeout { timeout_ms });
                }
                WaitStatus::Unknown(status) => {
                    tracing::warn!(produced, status, "unknown frame event status");
                    return Err(AcquisitionError::UnknownEvent(status));
                }
            }

            let now = Instant::now();
            self.control.record_interval(now - last_frame);
            last_frame = now;

            self.hw.read_region(&self.region, &mut scratch.data)?;
            lock_image(&self.image).copy_from(&scratch.data)?;

            if self.control.is_suspended() {
                continue;
            }

            let metadata = MetadataRecord::new(
                self.label.clone(),
                start_time,
                started.elapsed(),
                produced,
                self.roi_x,
                self.roi_y,
            );
            if self.sink.publish(&scratch, &metadata)? == PublishOutcome::Republished {
                tracing::debug!(image_number = produced, "frame re-published after queue clear");
            }
            produced += 1;
            self.control.frames.store(produced, Ordering::SeqCst);
            tracing::trace!(image_number = produced - 1, "frame published");
        }
    }

    /// Stop capture, then disarm the event, then report. Always ends with
    /// the session back at Idle, even if a step panics.
    fn finish(self, error: Option<AcquisitionError>) -> Option<AcquisitionError> {
        self.session.begin_stopping();

        let hw = &self.hw;
        match panic::catch_unwind(AssertUnwindSafe(|| hw.stop_continuous_capture())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to stop continuous capture"),
            Err(_) => tracing::error!("stop_continuous_capture panicked"),
        }
        let event = self.event;
        match panic::catch_unwind(AssertUnwindSafe(move || event.disarm())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to disarm frame event"),
            Err(_) => tracing::error!("frame event disarm panicked"),
        }

        let frames = self.control.frames();
        match &error {
            None => tracing::info!(camera = %self.label, frames, "acquisition finished"),
            Some(e) => tracing::warn!(camera = %self.label, frames, error = %e, "acquisition ended with error"),
        }

        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.finished(error.as_ref()))).is_err() {
            tracing::error!(camera = %self.label, "frame sink panicked in acquisition_finished");
        }
        self.control.set_last_error(error.clone());
        self.session.finish();
        error
    }
}
