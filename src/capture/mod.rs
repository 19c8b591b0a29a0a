//! Camera Capture Layer
//!
//! Frame acquisition sits behind the [`CameraSource`] trait so the capture
//! loop never cares where pixels come from. The bundled [`FileCamera`] replays
//! still images from disk, which is enough for headless use and testing.

pub mod frame;
pub mod session;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::capture::frame::CapturedFrame;
use crate::config::CaptureSettings;

pub use session::{CaptureSession, TriggerOutcome};

/// Image file extensions the file camera will pick up from a directory
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Image file or directory of images to replay
    pub source: PathBuf,
    /// Interval between frame reads in milliseconds
    pub frame_interval_ms: u64,
    /// Requested frame size, (0, 0) keeps the source size
    pub frame_size: (u32, u32),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            frame_interval_ms: 30,
            frame_size: (640, 480),
        }
    }
}

impl From<&CaptureSettings> for CaptureConfig {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            source: settings.source.clone().unwrap_or_default(),
            frame_interval_ms: settings.frame_interval_ms,
            frame_size: (settings.width, settings.height),
        }
    }
}

/// A source of camera frames, polled on a fixed interval
pub trait CameraSource: Send {
    /// Read the next frame. A failed read is a missed frame, not a fatal error.
    fn read_frame(&mut self) -> Result<CapturedFrame>;

    /// Release the underlying device
    fn release(&mut self) {}
}

/// Camera that replays still images from a file or directory
pub struct FileCamera {
    frames: Vec<CapturedFrame>,
    next: usize,
}

impl FileCamera {
    /// Open a file camera from the capture configuration
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let paths = collect_image_paths(&config.source)?;
        if paths.is_empty() {
            anyhow::bail!("No images found at {:?}", config.source);
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)
                .with_context(|| format!("Failed to load camera image: {:?}", path))?;
            let mut rgba = img.to_rgba8();

            let (w, h) = config.frame_size;
            if w > 0 && h > 0 && rgba.dimensions() != (w, h) {
                rgba = image::imageops::resize(&rgba, w, h, image::imageops::FilterType::Triangle);
            }

            debug!("Loaded camera image {:?} ({}x{})", path, rgba.width(), rgba.height());
            frames.push(CapturedFrame::new(rgba));
        }

        info!("File camera opened with {} image(s) from {:?}", frames.len(), config.source);
        Ok(Self { frames, next: 0 })
    }

    /// Create a camera that replays the given frames in order
    pub fn from_frames(frames: Vec<CapturedFrame>) -> Self {
        Self { frames, next: 0 }
    }
}

impl CameraSource for FileCamera {
    fn read_frame(&mut self) -> Result<CapturedFrame> {
        if self.frames.is_empty() {
            anyhow::bail!("Camera is released or has no frames");
        }
        let mut frame = self.frames[self.next % self.frames.len()].clone();
        frame.timestamp = std::time::Instant::now();
        self.next = (self.next + 1) % self.frames.len();
        Ok(frame)
    }

    fn release(&mut self) {
        if !self.frames.is_empty() {
            info!("Releasing file camera");
        }
        self.frames.clear();
    }
}

/// List image files at a path (a single file, or a directory sorted by name)
fn collect_image_paths(source: &Path) -> Result<Vec<PathBuf>> {
    if source.as_os_str().is_empty() {
        anyhow::bail!("No camera source configured");
    }

    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(source)
        .with_context(|| format!("Failed to read camera directory: {:?}", source))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_file_camera_cycles_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = CaptureConfig {
            source: dir.path().to_path_buf(),
            frame_interval_ms: 30,
            frame_size: (4, 2),
        };
        let mut camera = FileCamera::open(&config).unwrap();

        let first = camera.read_frame().unwrap();
        let second = camera.read_frame().unwrap();
        let third = camera.read_frame().unwrap();

        assert_eq!(first.dimensions(), (4, 2));
        assert_eq!(first.image.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(second.image.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(third.image.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_released_camera_fails_reads() {
        let mut camera = FileCamera::from_frames(vec![CapturedFrame::new(RgbaImage::new(2, 2))]);
        assert!(camera.read_frame().is_ok());
        camera.release();
        assert!(camera.read_frame().is_err());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let config = CaptureConfig::default();
        assert!(FileCamera::open(&config).is_err());
    }
}
