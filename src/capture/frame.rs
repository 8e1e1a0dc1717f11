use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::NativeHandle;

/// Description of one delivered frame.
///
/// `buffer_id` is the position of the backing buffer in the camera's pool and is the
/// token the consumer hands back when it is done with the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub geometry: BufferGeometry,
    /// Row stride in pixels
    pub stride: u32,
    pub handle: NativeHandle,
    pub buffer_id: u32,
    /// Per-session delivery counter
    pub sequence: u64,
    /// Capture time, microseconds since the Unix epoch
    pub timestamp_us: u64,
    pub device_id: Arc<str>,
}

impl FrameDescriptor {
    pub fn pixel_size(&self) -> u32 {
        self.geometry.format.bytes_per_pixel()
    }
}

/// Shape of a graphics buffer as requested from the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
}

impl BufferGeometry {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel formats we can fill; all are 32 bits per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Bgra8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Bgra8888 => 4,
        }
    }
}

/// Gralloc-style usage bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferUsage(pub u64);

impl BufferUsage {
    pub const SW_READ_RARELY: Self = Self(0x0000_0002);
    pub const SW_READ_OFTEN: Self = Self(0x0000_0003);
    pub const SW_WRITE_RARELY: Self = Self(0x0000_0020);
    pub const SW_WRITE_OFTEN: Self = Self(0x0000_0030);
    pub const HW_TEXTURE: Self = Self(0x0000_0100);
    pub const HW_CAMERA_WRITE: Self = Self(0x0002_0000);

    /// Usage the camera allocates its own buffers with
    pub const CAMERA_DEFAULT: Self = Self(
        Self::HW_TEXTURE.0 | Self::HW_CAMERA_WRITE.0 | Self::SW_READ_RARELY.0 | Self::SW_WRITE_RARELY.0,
    );

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
