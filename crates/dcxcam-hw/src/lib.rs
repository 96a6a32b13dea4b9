//! dcxcam-hw — Hardware abstraction for DCx-class USB cameras.
//!
//! Defines the camera interface consumed by the acquisition core, the
//! frame-ready event bridge, embedded sensor profiles, and an in-memory
//! simulated camera.

pub mod camera;
pub mod event;
pub mod frame;
pub mod sensors;
pub mod sim;

pub use camera::{
    CameraHardware, ColorMode, EventHandle, HwError, RegionDescriptor, SensorInfo, WaitStatus,
};
pub use event::FrameEvent;
pub use frame::Frame;
pub use sim::{SimCamera, SimEvent};
