//! Backend selection and result merging
//!
//! The orchestrator owns both backend pairs. On every capture it resolves the
//! selected [`Mode`] into the [`Backend`] that will actually run, invokes that
//! backend's object and text detectors on the same source frame, normalizes
//! what comes back, and composites the annotated frame.

use anyhow::Result;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::frame::CapturedFrame;
use crate::detect::probe::ConnectivityProbe;
use crate::detect::render::{composite, LabelFont};
use crate::detect::{
    Backend, BackendPair, BoundingBox, CoordinateSpace, Detection, DetectionKind,
    DetectionResult, Mode, RawObject, RawText, Region,
};

/// Default floor for text confidence; only values strictly above it pass
pub const DEFAULT_TEXT_CONFIDENCE_FLOOR: f32 = 0.4;

/// Mode shared between the detection worker and whoever toggles it
#[derive(Debug, Clone, Default)]
pub struct SharedMode(Arc<RwLock<Mode>>);

impl SharedMode {
    pub fn new(mode: Mode) -> Self {
        Self(Arc::new(RwLock::new(mode)))
    }

    /// Current mode
    pub fn get(&self) -> Mode {
        *self.0.read()
    }

    /// Set the mode explicitly
    pub fn set(&self, mode: Mode) {
        *self.0.write() = mode;
    }

    /// Advance AUTO -> ONLINE -> OFFLINE -> AUTO and return the new mode
    pub fn toggle(&self) -> Mode {
        let mut mode = self.0.write();
        *mode = mode.next();
        info!("Detection mode set to {}", *mode);
        *mode
    }
}

/// Resolve the selected mode into the backend that will run.
///
/// Forced modes never touch the probe.
pub fn resolve_backend(mode: Mode, probe: &dyn ConnectivityProbe, timeout: Duration) -> Backend {
    match mode {
        Mode::Online => Backend::Online,
        Mode::Offline => Backend::Offline,
        Mode::Auto => {
            if probe.is_available(timeout) {
                Backend::Online
            } else {
                Backend::Offline
            }
        }
    }
}

/// Detection-mode state machine and result-merging pipeline
pub struct DetectionOrchestrator {
    mode: SharedMode,
    probe: Box<dyn ConnectivityProbe>,
    probe_timeout: Duration,
    online: BackendPair,
    offline: BackendPair,
    text_confidence_floor: f32,
    label_font: Option<LabelFont>,
}

impl DetectionOrchestrator {
    /// Create an orchestrator with its backend pairs and connectivity probe
    pub fn new(
        mode: SharedMode,
        probe: Box<dyn ConnectivityProbe>,
        online: BackendPair,
        offline: BackendPair,
    ) -> Self {
        Self {
            mode,
            probe,
            probe_timeout: Duration::from_secs(2),
            online,
            offline,
            text_confidence_floor: DEFAULT_TEXT_CONFIDENCE_FLOOR,
            label_font: None,
        }
    }

    /// Set the probe deadline
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the text confidence floor
    pub fn with_text_confidence_floor(mut self, floor: f32) -> Self {
        self.text_confidence_floor = floor;
        self
    }

    /// Caption detections on the annotated frame with this font
    pub fn with_label_font(mut self, font: Option<LabelFont>) -> Self {
        self.label_font = font;
        self
    }

    /// Handle to the mode this orchestrator reads
    pub fn mode(&self) -> &SharedMode {
        &self.mode
    }

    /// Resolve the current mode into a backend
    pub fn resolve(&self) -> Backend {
        resolve_backend(self.mode.get(), self.probe.as_ref(), self.probe_timeout)
    }

    /// Run both detectors on a snapshot and merge the results.
    ///
    /// A failing detector contributes zero detections; if both fail the
    /// result carries the bare frame.
    pub fn run(&mut self, frame: &CapturedFrame) -> DetectionResult {
        let start = Instant::now();
        let capture_id = Uuid::new_v4();
        let mode = self.mode.get();
        let backend = resolve_backend(mode, self.probe.as_ref(), self.probe_timeout);
        let source = &frame.image;
        let (width, height) = source.dimensions();

        debug!("Capture {} resolved {} -> {}", capture_id, mode, backend);

        let pair = match backend {
            Backend::Online => &mut self.online,
            Backend::Offline => &mut self.offline,
        };

        let objects_name = pair.objects.name();
        let raw_objects = isolate("Object", objects_name, || pair.objects.detect(source));
        let texts_name = pair.texts.name();
        let raw_texts = isolate("Text", texts_name, || pair.texts.detect(source));

        let objects: Vec<Detection> = raw_objects
            .as_deref()
            .map(|raw| normalize_objects(raw, width, height))
            .unwrap_or_default();
        let texts: Vec<Detection> = raw_texts
            .as_deref()
            .map(|raw| normalize_texts(raw, width, height, self.text_confidence_floor))
            .unwrap_or_default();

        let annotated = if raw_objects.is_none() && raw_texts.is_none() {
            warn!("Both {} backends failed; returning the unannotated frame", backend);
            source.clone()
        } else {
            composite(source, &objects, &texts, self.label_font.as_ref())
        };

        let elapsed = start.elapsed();
        info!(
            "Capture {} via {}: {} object(s), {} text(s) in {:?}",
            capture_id,
            backend,
            objects.len(),
            texts.len(),
            elapsed
        );

        DetectionResult {
            capture_id,
            objects,
            texts,
            annotated,
            backend_used: backend,
            mode,
            elapsed,
        }
    }
}

/// Run one backend call; an error or a panic both count as no result
fn isolate<T>(modality: &str, name: &str, call: impl FnOnce() -> Result<Vec<T>>) -> Option<Vec<T>> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(found)) => Some(found),
        Ok(Err(e)) => {
            warn!("{} backend '{}' failed: {:#}", modality, name, e);
            None
        }
        Err(payload) => {
            warn!("{} backend '{}' panicked: {}", modality, name, panic_message(payload.as_ref()));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Convert raw object detections into pixel-space, clipped detections
pub fn normalize_objects(raw: &[RawObject], width: u32, height: u32) -> Vec<Detection> {
    raw.iter()
        .map(|object| {
            let (x1, y1) = to_pixels(object.bbox.x1, object.bbox.y1, object.space, width, height);
            let (x2, y2) = to_pixels(object.bbox.x2, object.bbox.y2, object.space, width, height);
            Detection {
                kind: DetectionKind::Object,
                label: object.label.clone(),
                region: Region::Box(BoundingBox::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))),
                confidence: object.confidence.clamp(0.0, 1.0),
            }
        })
        .collect()
}

/// Convert raw text detections into pixel-space polygons, dropping anything
/// at or below the confidence floor or with fewer than four points
pub fn normalize_texts(raw: &[RawText], width: u32, height: u32, floor: f32) -> Vec<Detection> {
    raw.iter()
        .filter(|text| text.confidence > floor)
        .filter(|text| text.polygon.len() >= 4)
        .map(|text| Detection {
            kind: DetectionKind::Text,
            label: text.text.clone(),
            region: Region::Polygon(
                text.polygon
                    .iter()
                    .map(|&(x, y)| to_pixels(x, y, text.space, width, height))
                    .collect(),
            ),
            confidence: text.confidence.clamp(0.0, 1.0),
        })
        .collect()
}

fn to_pixels(x: f32, y: f32, space: CoordinateSpace, width: u32, height: u32) -> (f32, f32) {
    let (w, h) = (width as f32, height as f32);
    let (px, py) = match space {
        CoordinateSpace::Pixels => (x, y),
        CoordinateSpace::Normalized => (x * w, y * h),
    };
    (px.clamp(0.0, w), py.clamp(0.0, h))
}
