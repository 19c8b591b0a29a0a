//! Detection Core
//!
//! Backend-agnostic detection types, the capability traits every backend
//! implements, and the orchestrator that picks a backend per capture and
//! merges object and text results into one [`DetectionResult`].

pub mod orchestrator;
pub mod probe;
pub mod render;

use anyhow::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub use orchestrator::{resolve_backend, DetectionOrchestrator, SharedMode};
pub use probe::{ConnectivityProbe, TcpProbe};

/// Operator-selected backend policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Cloud when the network is reachable, local otherwise
    #[default]
    Auto,
    /// Always the cloud backend
    Online,
    /// Always the local backend
    Offline,
}

impl Mode {
    /// Next mode in the toggle cycle (AUTO -> ONLINE -> OFFLINE -> AUTO)
    pub fn next(self) -> Self {
        match self {
            Mode::Auto => Mode::Online,
            Mode::Online => Mode::Offline,
            Mode::Offline => Mode::Auto,
        }
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Auto => "AUTO",
            Mode::Online => "ONLINE",
            Mode::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Mode::Auto),
            "online" => Ok(Mode::Online),
            "offline" => Ok(Mode::Offline),
            other => Err(anyhow::anyhow!("Unknown mode: {}", other)),
        }
    }
}

/// The backend that actually ran for a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Cloud object localization + cloud text detection
    Online,
    /// Local neural detector + local OCR
    Offline,
}

impl Backend {
    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Online => "ONLINE",
            Backend::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Axis-aligned box (x1, y1) top-left to (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Coordinate convention a backend reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// Source-image pixels
    Pixels,
    /// Fractions of the source width/height in [0, 1]
    Normalized,
}

/// Object detection as reported by a backend
#[derive(Debug, Clone)]
pub struct RawObject {
    pub label: String,
    pub bbox: BoundingBox,
    pub space: CoordinateSpace,
    pub confidence: f32,
}

/// Text detection as reported by a backend
#[derive(Debug, Clone)]
pub struct RawText {
    pub text: String,
    /// Polygon points, expected to have at least four
    pub polygon: Vec<(f32, f32)>,
    pub space: CoordinateSpace,
    pub confidence: f32,
}

/// Detection modality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionKind {
    Object,
    Text,
}

/// Where a detection sits in the source image, in pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Box(BoundingBox),
    Polygon(Vec<(f32, f32)>),
}

/// A normalized detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: DetectionKind,
    pub label: String,
    pub region: Region,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

/// Merged output of one capture cycle
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Identifier for log correlation
    pub capture_id: Uuid,
    /// Object detections, in backend order
    pub objects: Vec<Detection>,
    /// Text detections, in backend order
    pub texts: Vec<Detection>,
    /// Source frame with detection outlines composited on top
    pub annotated: RgbaImage,
    /// Backend that actually ran
    pub backend_used: Backend,
    /// Mode that was selected when the capture ran
    pub mode: Mode,
    /// Wall time spent in backends and compositing
    pub elapsed: Duration,
}

impl DetectionResult {
    /// Object labels in detection order
    pub fn object_labels(&self) -> Vec<&str> {
        self.objects.iter().map(|d| d.label.as_str()).collect()
    }

    /// Text labels in detection order
    pub fn text_labels(&self) -> Vec<&str> {
        self.texts.iter().map(|d| d.label.as_str()).collect()
    }

    /// Whether nothing was detected
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.texts.is_empty()
    }

    /// The spoken/status summary of this result
    pub fn announcement(&self) -> String {
        crate::speech::format_announcement(&self.object_labels(), &self.text_labels())
    }
}

/// Object detection capability
pub trait ObjectDetector: Send {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Detect objects in an RGBA image
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawObject>>;
}

/// Text detection capability
pub trait TextDetector: Send {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Detect text in an RGBA image
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawText>>;
}

/// One object detector plus one text detector, selected together
pub struct BackendPair {
    pub objects: Box<dyn ObjectDetector>,
    pub texts: Box<dyn TextDetector>,
}

impl BackendPair {
    pub fn new(objects: Box<dyn ObjectDetector>, texts: Box<dyn TextDetector>) -> Self {
        Self { objects, texts }
    }
}

/// Stand-in for a backend that failed to initialize; every call fails
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    name: &'static str,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: reason.into(),
        }
    }
}

impl ObjectDetector for UnavailableBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, _image: &RgbaImage) -> Result<Vec<RawObject>> {
        Err(anyhow::anyhow!("{} unavailable: {}", self.name, self.reason))
    }
}

impl TextDetector for UnavailableBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, _image: &RgbaImage) -> Result<Vec<RawText>> {
        Err(anyhow::anyhow!("{} unavailable: {}", self.name, self.reason))
    }
}
