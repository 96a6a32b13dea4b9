//! Frame hand-off to the downstream consumer.
//!
//! [`FrameSink`] is the consumer's side of the contract. [`SinkAdapter`]
//! wraps it with the session's overflow policy. [`QueueSink`] is a bounded
//! in-process queue for hosts that pull frames from another thread.

use crate::error::AcquisitionError;
use crate::metadata::MetadataRecord;
use crate::types::OverflowPolicy;
use dcxcam_hw::Frame;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("sink rejected the frame: {0}")]
    Rejected(String),
    #[error("sink closed")]
    Closed,
}

/// Result of a successful insert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    Accepted,
    /// The consumer's queue is full and the frame was not stored.
    Overflow,
}

/// Downstream consumer of acquired frames.
pub trait FrameSink: Send + Sync {
    /// Called once before the first frame of a sequence.
    fn prepare_for_acquisition(&self, camera: &str) -> Result<(), SinkError>;

    /// Offer one frame. `process` is false for a re-insert after the
    /// queue was cleared.
    fn insert_image(
        &self,
        camera: &str,
        frame: &Frame,
        metadata: &str,
        process: bool,
    ) -> Result<InsertStatus, SinkError>;

    /// Drop every queued frame.
    fn clear_image_queue(&self, camera: &str);

    /// Called once when a sequence ends, with the error that ended it.
    fn acquisition_finished(&self, camera: &str, error: Option<&AcquisitionError>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The queue overflowed, was cleared, and the frame re-inserted.
    Republished,
}

/// Applies an overflow policy on top of a [`FrameSink`].
pub struct SinkAdapter {
    sink: Arc<dyn FrameSink>,
    camera: String,
    policy: OverflowPolicy,
}

impl SinkAdapter {
    pub fn new(sink: Arc<dyn FrameSink>, camera: impl Into<String>, policy: OverflowPolicy) -> Self {
        Self {
            sink,
            camera: camera.into(),
            policy,
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn prepare(&self) -> Result<(), AcquisitionError> {
        Ok(self.sink.prepare_for_acquisition(&self.camera)?)
    }

    /// Hand one frame downstream.
    ///
    /// On overflow with [`OverflowPolicy::Stop`] this fails with
    /// `PublishOverflow`. With [`OverflowPolicy::DropAndContinue`] the queue
    /// is cleared and the frame inserted once more without processing; a
    /// second overflow also fails with `PublishOverflow`.
    pub fn publish(
        &self,
        frame: &Frame,
        metadata: &MetadataRecord,
    ) -> Result<PublishOutcome, AcquisitionError> {
        let md = metadata.serialize();
        match self.sink.insert_image(&self.camera, frame, &md, true)? {
            InsertStatus::Accepted => return Ok(PublishOutcome::Published),
            InsertStatus::Overflow => {}
        }

        match self.policy {
            OverflowPolicy::Stop => {
                tracing::warn!(
                    camera = %self.camera,
                    image_number = metadata.image_number,
                    "frame sink overflow, stopping"
                );
                Err(AcquisitionError::PublishOverflow)
            }
            OverflowPolicy::DropAndContinue => {
                tracing::debug!(
                    camera = %self.camera,
                    image_number = metadata.image_number,
                    "frame sink overflow, clearing queue"
                );
                self.sink.clear_image_queue(&self.camera);
                match self.sink.insert_image(&self.camera, frame, &md, false)? {
                    InsertStatus::Accepted => Ok(PublishOutcome::Republished),
                    InsertStatus::Overflow => Err(AcquisitionError::PublishOverflow),
                }
            }
        }
    }

    pub fn finished(&self, error: Option<&AcquisitionError>) {
        self.sink.acquisition_finished(&self.camera, error);
    }
}

/// A frame held by a [`QueueSink`].
#[derive(Debug, Clone)]
pub struct QueuedImage {
    pub frame: Frame,
    pub metadata: String,
    pub processed: bool,
}

/// Counters kept by a [`QueueSink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub prepared: u64,
    pub inserted: u64,
    pub overflows: u64,
    pub clears: u64,
    pub finished: u64,
    pub last_error: Option<AcquisitionError>,
}

struct QueueState {
    images: VecDeque<QueuedImage>,
    stats: QueueStats,
    closed: bool,
}

/// Bounded queue sink. Inserting into a full queue reports overflow.
pub struct QueueSink {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl QueueSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                images: VecDeque::with_capacity(capacity),
                stats: QueueStats::default(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats.clone()
    }

    pub fn pop(&self) -> Option<QueuedImage> {
        self.lock().images.pop_front()
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `None` on timeout, or immediately once the queue is empty
    /// and the acquisition has finished.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedImage> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.images.is_empty() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        state.images.pop_front()
    }

    /// Whether the last acquisition finished and every frame was consumed.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.images.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameSink for QueueSink {
    fn prepare_for_acquisition(&self, camera: &str) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.closed = false;
        state.stats.prepared += 1;
        tracing::debug!(camera, capacity = self.capacity, "queue sink prepared");
        Ok(())
    }

    fn insert_image(
        &self,
        _camera: &str,
        frame: &Frame,
        metadata: &str,
        process: bool,
    ) -> Result<InsertStatus, SinkError> {
        let mut state = self.lock();
        if state.images.len() >= self.capacity {
            state.stats.overflows += 1;
            return Ok(InsertStatus::Overflow);
        }
        state.images.push_back(QueuedImage {
            frame: frame.clone(),
            metadata: metadata.to_string(),
            processed: process,
        });
        state.stats.inserted += 1;
        self.ready.notify_one();
        Ok(InsertStatus::Accepted)
    }

    fn clear_image_queue(&self, camera: &str) {
        let mut state = self.lock();
        let dropped = state.images.len();
        state.images.clear();
        state.stats.clears += 1;
        tracing::debug!(camera, dropped, "queue sink cleared");
    }

    fn acquisition_finished(&self, camera: &str, error: Option<&AcquisitionError>) {
        let mut state = self.lock();
        state.closed = true;
        state.stats.finished += 1;
        state.stats.last_error = error.cloned();
        self.ready.notify_all();
        tracing::debug!(camera, queued = state.images.len(), "queue sink finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn record(n: u64) -> MetadataRecord {
        MetadataRecord::new("cam", chrono::Utc::now(), Duration::from_millis(n), n, 0, 0)
    }

    fn adapter(sink: Arc<QueueSink>, policy: OverflowPolicy) -> SinkAdapter {
        SinkAdapter::new(sink, "cam", policy)
    }

    #[test]
    fn test_publish_accepted() {
        let sink = Arc::new(QueueSink::new(2));
        let adapter = adapter(sink.clone(), OverflowPolicy::Stop);
        let outcome = adapter.publish(&Frame::new(2, 2, 8), &record(0)).unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
        let queued = sink.pop().unwrap();
        assert!(queued.processed);
        assert!(queued.metadata.contains("\"ImageNumber\":\"0\""));
    }

    #[test]
    fn test_overflow_stop() {
        let sink = Arc::new(QueueSink::new(1));
        let adapter = adapter(sink.clone(), OverflowPolicy::Stop);
        let frame = Frame::new(2, 2, 8);
        adapter.publish(&frame, &record(0)).unwrap();
        assert_eq!(
            adapter.publish(&frame, &record(1)),
            Err(AcquisitionError::PublishOverflow)
        );
        assert_eq!(sink.stats().clears, 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_overflow_clears_and_reinserts() {
        let sink = Arc::new(QueueSink::new(1));
        let adapter = adapter(sink.clone(), OverflowPolicy::DropAndContinue);
        let frame = Frame::new(2, 2, 8);
        adapter.publish(&frame, &record(0)).unwrap();
        let outcome = adapter.publish(&frame, &record(1)).unwrap();
        assert_eq!(outcome, PublishOutcome::Republished);

        let stats = sink.stats();
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.overflows, 1);
        let queued = sink.pop().unwrap();
        assert!(!queued.processed);
        assert!(queued.metadata.contains("\"ImageNumber\":\"1\""));
    }

    #[test]
    fn test_second_overflow_fails() {
        let sink = Arc::new(QueueSink::new(0));
        let adapter = adapter(sink.clone(), OverflowPolicy::DropAndContinue);
        assert_eq!(
            adapter.publish(&Frame::new(1, 1, 8), &record(0)),
            Err(AcquisitionError::PublishOverflow)
        );
        assert_eq!(sink.stats().overflows, 2);
        assert_eq!(sink.stats().clears, 1);
    }

    #[test]
    fn test_pop_timeout_returns_after_finish() {
        let sink = QueueSink::new(4);
        let start = Instant::now();
        assert!(sink.pop_timeout(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));

        sink.acquisition_finished("cam", Some(&AcquisitionError::PublishOverflow));
        assert!(sink.pop_timeout(Duration::from_secs(5)).is_none());
        assert!(sink.is_drained());
        assert_eq!(
            sink.stats().last_error,
            Some(AcquisitionError::PublishOverflow)
        );
    }
}
