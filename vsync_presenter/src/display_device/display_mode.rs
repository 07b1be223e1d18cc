/// Display mode types - geometry, scan type, refresh and pixel format

use std::fmt;
use std::time::Duration;
use glam::UVec2;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 16-bit 5:6:5 RGB
    Rgb565,
    /// 32-bit RGB, top byte ignored
    Xrgb8888,
    /// Packed 4:2:2 luma/chroma, the console's external framebuffer format
    Yuyv422,
}

impl PixelFormat {
    /// Bytes per pixel (4:2:2 averages to two)
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
            PixelFormat::Yuyv422 => 2,
        }
    }

    /// Word that paints two (16-bit formats) or one (32-bit) black pixels
    pub fn black_word(self) -> u32 {
        match self {
            PixelFormat::Rgb565 | PixelFormat::Xrgb8888 => 0,
            // Y=0x10, Cb/Cr=0x80, byte order Y0 U Y1 V
            PixelFormat::Yuyv422 => 0x8010_8010,
        }
    }
}

/// How the display scans a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// Every line every refresh
    Progressive,
    /// Alternating fields
    Interlaced,
    /// Low-resolution non-interlaced (240p/288p), same field twice
    DoubleStrike,
}

/// Refresh descriptor: scan type plus rate in millihertz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshDescriptor {
    pub scan: ScanMode,
    pub millihertz: u32,
}

impl RefreshDescriptor {
    pub const fn new(scan: ScanMode, millihertz: u32) -> Self {
        Self { scan, millihertz }
    }

    /// Refresh rate in Hz
    pub fn hz(&self) -> f32 {
        self.millihertz as f32 / 1000.0
    }

    /// Duration of one refresh interval
    pub fn frame_period(&self) -> Duration {
        let mhz = self.millihertz.max(1) as u64;
        Duration::from_nanos(1_000_000_000_000 / mhz)
    }

    pub fn is_interlaced(&self) -> bool {
        self.scan == ScanMode::Interlaced
    }
}

/// A complete display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh: RefreshDescriptor,
    pub format: PixelFormat,
}

impl DisplayMode {
    pub const fn new(width: u32, height: u32, refresh: RefreshDescriptor, format: PixelFormat) -> Self {
        Self { width, height, refresh, format }
    }

    /// Geometry as a vector
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Whether both modes have the same width and height
    pub fn same_geometry(&self, other: &DisplayMode) -> bool {
        self.size() == other.size()
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scan = match self.refresh.scan {
            ScanMode::Progressive => "p",
            ScanMode::Interlaced => "i",
            ScanMode::DoubleStrike => "ds",
        };
        write!(f, "{}x{}@{:.2}{} {:?}", self.width, self.height, self.refresh.hz(), scan, self.format)
    }
}

/// Hardware geometry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayLimits {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Widths are multiples of this
    pub width_align: u32,
    /// Heights are multiples of this
    pub height_align: u32,
    /// Row pitch in bytes is a multiple of this (at least 4)
    pub stride_align: u32,
}

impl DisplayLimits {
    /// Clamp to the maxima and round down to alignment
    ///
    /// The result never drops below the (aligned) minimum.
    pub fn clamp_and_align(&self, width: u32, height: u32) -> UVec2 {
        let align = UVec2::new(self.width_align.max(1), self.height_align.max(1));
        let max = (UVec2::new(self.max_width, self.max_height) / align) * align;
        let min = ((UVec2::new(self.min_width, self.min_height) + align - UVec2::ONE) / align) * align;
        let min = min.max(align).min(max);

        let clamped = UVec2::new(width, height).min(max);
        ((clamped / align) * align).max(min)
    }

    /// Whether a geometry is inside the limits and aligned
    pub fn admits(&self, width: u32, height: u32) -> bool {
        width >= self.min_width
            && height >= self.min_height
            && width <= self.max_width
            && height <= self.max_height
            && width % self.width_align.max(1) == 0
            && height % self.height_align.max(1) == 0
    }

    /// Row pitch in bytes for a width and format
    pub fn stride_for(&self, width: u32, format: PixelFormat) -> u32 {
        let align = self.stride_align.max(4);
        let row = width * format.bytes_per_pixel();
        row.div_ceil(align) * align
    }
}
