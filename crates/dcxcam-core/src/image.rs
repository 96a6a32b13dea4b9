//! Image holder: the most recently captured frame, shared between the
//! acquisition worker and the caller's context.

use crate::error::AcquisitionError;
use dcxcam_hw::frame::bytes_per_pixel;
use dcxcam_hw::{Frame, RegionDescriptor};
use std::sync::{Arc, Mutex, MutexGuard};

/// Decoded pixel buffer with its geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHolder {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    bit_depth: u32,
    components: u32,
}

impl Default for ImageHolder {
    fn default() -> Self {
        Self {
            pixels: Vec::new(),
            width: 0,
            height: 0,
            bytes_per_pixel: 1,
            bit_depth: 8,
            components: 1,
        }
    }
}

impl ImageHolder {
    /// Reallocate for a new geometry. Pixel contents are zeroed.
    pub fn resize(&mut self, width: u32, height: u32, bit_depth: u32) {
        self.width = width;
        self.height = height;
        self.bit_depth = bit_depth;
        self.bytes_per_pixel = bytes_per_pixel(bit_depth);
        self.pixels = vec![0; self.buffer_size()];
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    /// width × height × bytes-per-pixel.
    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Overwrite the whole image with `src`, which must match its size.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<(), AcquisitionError> {
        if src.len() != self.pixels.len() {
            return Err(AcquisitionError::FrameSize {
                expected: self.pixels.len(),
                actual: src.len(),
            });
        }
        self.pixels.copy_from_slice(src);
        Ok(())
    }

    /// Whether the device region has the same geometry as this image.
    pub fn matches(&self, region: &RegionDescriptor) -> bool {
        region.width == self.width
            && region.height == self.height
            && region.bytes_per_pixel() == self.bytes_per_pixel
    }

    pub fn snapshot(&self) -> Frame {
        Frame {
            data: self.pixels.clone(),
            width: self.width,
            height: self.height,
            bytes_per_pixel: self.bytes_per_pixel,
            bit_depth: self.bit_depth,
        }
    }
}

/// Image holder behind its exclusive lock.
pub type SharedImage = Arc<Mutex<ImageHolder>>;

/// Lock the shared image. Every critical section is a single resize or
/// memcpy, so the holder is consistent even after a poisoning panic.
pub fn lock_image(image: &SharedImage) -> MutexGuard<'_, ImageHolder> {
    image.lock().unwrap_or_else(|e| e.into_inner())
}
