//! Format descriptors and the capability catalogue record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Major kind of a media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
    Text,
    Stream,
}

/// Uncompressed pixel layouts a capture device can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// YVYU 4:2:2 packed format
    Yvyu,
    /// UYVY 4:2:2 packed format
    Uyvy,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
    /// YUV420 planar format
    Yuv420,
    /// YVU420 planar format
    Yvu420,
    /// RGB565 format
    Rgb565,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
    /// 32-bit RGB with a padding byte
    Rgb32,
    /// Grayscale format
    Grey,
}

impl PixelFormat {
    /// Average bits per pixel, as stored in a frame buffer
    pub fn bits_per_pixel(&self) -> u16 {
        match self {
            PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Uyvy => 16,
            PixelFormat::Nv12 | PixelFormat::Yuv420 | PixelFormat::Yvu420 => 12,
            PixelFormat::Rgb565 => 16,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 24,
            PixelFormat::Rgb32 => 32,
            PixelFormat::Grey => 8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Yvyu => "YVYU",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Yvu420 => "YVU420",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Rgb32 => "RGB32",
            PixelFormat::Grey => "GREY",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const QVGA: Resolution = Resolution::new(320, 240);
    pub const VGA: Resolution = Resolution::new(640, 480);
    pub const HD720: Resolution = Resolution::new(1280, 720);
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Shape of one video stream
///
/// The derived byte size (`width * height * bit_count / 8`) is what the
/// acquisition thread writes into each buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub kind: MediaKind,
    /// Pixel layout, when the backend reports one
    pub pixel_format: Option<PixelFormat>,
    pub resolution: Resolution,
    /// Bits per pixel
    pub bit_count: u16,
    /// Time between frames, when known
    pub frame_interval: Option<Duration>,
}

impl FormatDescriptor {
    /// Create a video descriptor from raw dimensions and bit depth
    pub fn new(width: u32, height: u32, bit_count: u16) -> Self {
        Self {
            kind: MediaKind::Video,
            pixel_format: None,
            resolution: Resolution::new(width, height),
            bit_count,
            frame_interval: None,
        }
    }

    /// Create a video descriptor for a known pixel layout
    pub fn video(resolution: Resolution, pixel_format: PixelFormat) -> Self {
        Self {
            kind: MediaKind::Video,
            pixel_format: Some(pixel_format),
            resolution,
            bit_count: pixel_format.bits_per_pixel(),
            frame_interval: None,
        }
    }

    /// Set the frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.frame_interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        self
    }

    /// Override the media kind
    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Bytes needed for one frame
    pub fn image_size(&self) -> usize {
        (self.resolution.pixels() * self.bit_count as u64 / 8) as usize
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pixel_format {
            Some(pf) => write!(f, "{} {} ({}bpp)", self.resolution, pf, self.bit_count),
            None => write!(f, "{} ({}bpp)", self.resolution, self.bit_count),
        }
    }
}

/// Constraint range attached to one capability catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRange {
    pub min_output_size: Resolution,
    pub max_output_size: Resolution,
    /// Horizontal step between supported widths
    pub output_granularity_x: u32,
    /// Vertical step between supported heights
    pub output_granularity_y: u32,
    pub min_frame_interval: Duration,
    pub max_frame_interval: Duration,
    pub min_bits_per_second: u64,
    pub max_bits_per_second: u64,
}

impl CapabilityRange {
    /// Range that admits exactly one descriptor
    pub fn fixed(format: &FormatDescriptor) -> Self {
        let interval = format
            .frame_interval
            .unwrap_or(Duration::from_secs(1) / 30);
        let bits_per_frame = format.image_size() as u64 * 8;
        let fps = (Duration::from_secs(1).as_nanos() / interval.as_nanos().max(1)) as u64;
        Self {
            min_output_size: format.resolution,
            max_output_size: format.resolution,
            output_granularity_x: 1,
            output_granularity_y: 1,
            min_frame_interval: interval,
            max_frame_interval: interval,
            min_bits_per_second: bits_per_frame * fps,
            max_bits_per_second: bits_per_frame * fps,
        }
    }

    /// Check whether a descriptor's dimensions fall inside this range
    pub fn allows(&self, format: &FormatDescriptor) -> bool {
        let (w, h) = (format.width(), format.height());
        let step_ok = |value: u32, min: u32, step: u32| step == 0 || (value - min) % step == 0;

        w >= self.min_output_size.width
            && w <= self.max_output_size.width
            && h >= self.min_output_size.height
            && h <= self.max_output_size.height
            && step_ok(w, self.min_output_size.width, self.output_granularity_x)
            && step_ok(h, self.min_output_size.height, self.output_granularity_y)
    }
}

/// Size in bytes of one capability record, as reported by capability enumeration
pub const CAPABILITY_RECORD_SIZE: usize = std::mem::size_of::<CapabilityRange>();
