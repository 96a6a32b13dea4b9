//! Frame buffer manager: owns the device-attached frame memory region.

use crate::error::AcquisitionError;
use crate::session::Session;
use dcxcam_hw::{CameraHardware, HwError, RegionDescriptor};
use std::sync::Arc;

/// Keeps exactly one frame-memory region registered as the device's
/// capture target.
pub struct FrameBufferManager {
    hw: Arc<dyn CameraHardware>,
    session: Arc<Session>,
    active: Option<RegionDescriptor>,
}

impl FrameBufferManager {
    pub fn new(hw: Arc<dyn CameraHardware>, session: Arc<Session>) -> Self {
        Self {
            hw,
            session,
            active: None,
        }
    }

    /// The region the device currently captures into.
    pub fn active(&self) -> Option<&RegionDescriptor> {
        self.active.as_ref()
    }

    /// Replace the active region with one of the given geometry.
    ///
    /// The old region is released before the new one is requested. If the
    /// device refuses the new size, a region matching the old geometry is
    /// provisioned again so the previous configuration stays usable.
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<RegionDescriptor, AcquisitionError> {
        if !self.session.is_idle() {
            return Err(AcquisitionError::DeviceBusy("sequence acquisition running"));
        }

        let previous = self.active.take();
        if let Some(old) = &previous {
            if let Err(e) = self.hw.free_region(old) {
                self.active = previous;
                return Err(e.into());
            }
        }

        match self.provision(width, height, bits_per_pixel) {
            Ok(region) => {
                tracing::debug!(
                    region = region.id,
                    width,
                    height,
                    bits_per_pixel,
                    "frame buffer configured"
                );
                self.active = Some(region.clone());
                Ok(region)
            }
            Err(err) => {
                tracing::warn!(error = %err, width, height, bits_per_pixel, "frame buffer reconfiguration failed");
                if let Some(old) = previous {
                    match self.provision(old.width, old.height, old.bits_per_pixel) {
                        Ok(region) => self.active = Some(region),
                        Err(e) => {
                            tracing::error!(error = %e, "failed to restore previous frame buffer")
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Release the active region, if any.
    pub fn release(&mut self) -> Result<(), AcquisitionError> {
        if let Some(region) = self.active.take() {
            self.hw.free_region(&region)?;
            tracing::debug!(region = region.id, "frame buffer released");
        }
        Ok(())
    }

    fn provision(
        &self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<RegionDescriptor, AcquisitionError> {
        let region = self
            .hw
            .alloc_region(width, height, bits_per_pixel)
            .map_err(|e| match e {
                HwError::AllocationFailed(msg) => AcquisitionError::Allocation(msg),
                other => AcquisitionError::Hardware(other),
            })?;
        if let Err(e) = self.hw.set_active_region(&region) {
            if let Err(free_err) = self.hw.free_region(&region) {
                tracing::warn!(error = %free_err, region = region.id, "failed to free unused region");
            }
            return Err(e.into());
        }
        Ok(region)
    }
}
