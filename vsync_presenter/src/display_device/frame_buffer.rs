/// Frame buffer - pixel memory plus geometry
///
/// Pixel memory is word-backed so 16- and 32-bit views can be taken without
/// alignment checks. Frame buffers are created only when a swap chain is
/// built and are never resized; a geometry change rebuilds the chain.

use crate::display_device::{DisplayMode, PixelFormat};
use crate::error::{Error, Result};

/// Pixel memory for one frame
#[derive(Debug)]
pub struct FrameBuffer {
    pixels: Vec<u32>,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl FrameBuffer {
    /// Allocate a frame buffer cleared to black
    ///
    /// # Errors
    ///
    /// `BufferAllocationFailed` if the stride is not word aligned, too small
    /// for the width, or the memory cannot be reserved.
    pub fn allocate(width: u32, height: u32, stride: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::BufferAllocationFailed(format!(
                "empty geometry {}x{}", width, height
            )));
        }
        if stride % 4 != 0 || stride < width * format.bytes_per_pixel() {
            return Err(Error::BufferAllocationFailed(format!(
                "stride {} invalid for {}x{} {:?}", stride, width, height, format
            )));
        }

        let words = (stride as usize / 4) * height as usize;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(words).map_err(|e| {
            Error::BufferAllocationFailed(format!(
                "{} bytes for {}x{}: {}", words * 4, width, height, e
            ))
        })?;
        pixels.resize(words, format.black_word());

        Ok(Self { pixels, width, height, stride, format })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> usize {
        self.pixels.len() * 4
    }

    /// Whether this buffer has the geometry and format of `mode`
    pub fn matches(&self, mode: &DisplayMode) -> bool {
        self.width == mode.width && self.height == mode.height && self.format == mode.format
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Raw bytes, writable
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.pixels)
    }

    /// 32-bit pixel view (`Xrgb8888`)
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// 16-bit pixel view (`Rgb565`, `Yuyv422`)
    pub fn halfwords_mut(&mut self) -> &mut [u16] {
        bytemuck::cast_slice_mut(&mut self.pixels)
    }

    /// One row of bytes, including stride padding
    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.stride as usize;
        let start = y as usize * stride;
        Some(&mut self.bytes_mut()[start..start + stride])
    }

    /// Paint the whole buffer black
    pub fn clear_black(&mut self) {
        let black = self.format.black_word();
        self.pixels.fill(black);
    }
}
