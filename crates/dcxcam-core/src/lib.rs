//! dcxcam-core — sequence acquisition engine for frame-event driven cameras.
//!
//! A background worker waits on the device's frame-ready event, copies each
//! frame into a shared image holder and hands it to the host's frame sink,
//! while the controller reconfigures the device from the caller's thread.

pub mod config;
pub mod controller;
pub mod error;
pub mod frame_buffer;
pub mod image;
pub mod metadata;
pub mod properties;
pub mod session;
pub mod sink;
pub mod types;
pub mod worker;

pub use config::CameraConfig;
pub use controller::AcquisitionController;
pub use error::AcquisitionError;
pub use metadata::MetadataRecord;
pub use properties::{Property, PropertyError, PropertyKind, PropertyValue};
pub use session::SessionState;
pub use sink::{FrameSink, InsertStatus, QueueSink, SinkAdapter, SinkError};
pub use types::{FrameCount, OverflowPolicy, PixelType, Roi, SequenceParams};
