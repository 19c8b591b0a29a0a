//! Frame data structures for camera content

use image::RgbaImage;
use std::time::Instant;

/// A frame read from the camera
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGBA pixel buffer
    pub image: RgbaImage,
    /// Timestamp when the frame was read
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from raw RGBA bytes
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(Self::new)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGBA bytes
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }
}
