//! Frame type and pixel helpers: depth conversion, brightness and a test pattern.

/// Bytes needed to store one pixel of the given bit depth.
pub fn bytes_per_pixel(bits_per_pixel: u32) -> u32 {
    bits_per_pixel.div_ceil(8)
}

/// An owned monochrome camera frame.
///
/// Pixels wider than 8 bits are stored as little-endian 16-bit words.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Significant bits per pixel (dynamic range), independent of storage.
    pub bit_depth: u32,
}

impl Frame {
    /// Zero-filled frame of the given geometry.
    pub fn new(width: u32, height: u32, bit_depth: u32) -> Self {
        let bytes_per_pixel = bytes_per_pixel(bit_depth);
        Self {
            data: vec![0; width as usize * height as usize * bytes_per_pixel as usize],
            width,
            height,
            bytes_per_pixel,
            bit_depth,
        }
    }

    /// Wrap an existing buffer, checking its length against the geometry.
    pub fn from_bytes(
        data: Vec<u8>,
        width: u32,
        height: u32,
        bit_depth: u32,
    ) -> Result<Self, FrameError> {
        let bytes_per_pixel = bytes_per_pixel(bit_depth);
        let expected = width as usize * height as usize * bytes_per_pixel as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            bytes_per_pixel,
            bit_depth,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Pixel value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel as usize;
        match self.bytes_per_pixel {
            1 => self.data.get(idx).map(|&v| u16::from(v)),
            _ => {
                let low = *self.data.get(idx)?;
                let high = *self.data.get(idx + 1)?;
                Some(u16::from_le_bytes([low, high]))
            }
        }
    }

    /// Pixels as 16-bit values (one entry per pixel).
    pub fn to_u16(&self) -> Vec<u16> {
        match self.bytes_per_pixel {
            1 => self.data.iter().map(|&v| u16::from(v)).collect(),
            _ => self
                .data
                .chunks_exact(2)
                .map(|w| u16::from_le_bytes([w[0], w[1]]))
                .collect(),
        }
    }

    /// Downscale to 8-bit grayscale, keeping the most significant bits.
    pub fn to_gray8(&self) -> Vec<u8> {
        match self.bytes_per_pixel {
            1 => self.data.clone(),
            _ => {
                let shift = self.bit_depth.saturating_sub(8).min(8);
                self.data
                    .chunks_exact(2)
                    .map(|w| (u16::from_le_bytes([w[0], w[1]]) >> shift).min(255) as u8)
                    .collect()
            }
        }
    }

    /// Average 8-bit brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = self.to_gray8();
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
    }
}

/// Fill `buf` with a moving diagonal gradient for frame number `frame_nr`.
///
/// `buf` must hold `width * height * bytes_per_pixel` bytes; any excess is
/// left untouched. 16-bit pixels are written little-endian.
pub fn fill_test_pattern(
    buf: &mut [u8],
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    frame_nr: u64,
) {
    let bpp = bytes_per_pixel as usize;
    let w = width as usize;
    let offset = (frame_nr % 4096) as usize;
    for (i, px) in buf.chunks_exact_mut(bpp).take(w * height as usize).enumerate() {
        let (x, y) = (i % w, i / w);
        let value = x + y + offset;
        match bpp {
            1 => px[0] = (value % 256) as u8,
            _ => {
                let bytes = (((value % 4096) as u16) + 100).to_le_bytes();
                px[0] = bytes[0];
                px[1] = bytes[1];
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
