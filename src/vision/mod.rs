//! Local (offline) Backend
//!
//! On-device detection through ONNX Runtime: a YOLOv8 object detector and
//! PaddleOCR for text. Models that cannot be loaded leave their modality
//! permanently failing, which the orchestrator reports as empty.

pub mod detector;
pub mod models;
pub mod ocr;
pub mod preprocess;

use tracing::{info, warn};

use crate::config::LocalSettings;
use crate::detect::{BackendPair, ObjectDetector, TextDetector, UnavailableBackend};

pub use detector::LocalDetector;
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{LocalOcr, OcrEngine, OcrResult};

/// Load the offline object and text backends
pub fn build_offline_backends(settings: &LocalSettings) -> BackendPair {
    let objects: Box<dyn ObjectDetector> = match LocalDetector::from_settings(settings) {
        Ok(detector) => {
            info!("Local object detector ready");
            Box::new(detector)
        }
        Err(e) => {
            warn!("Local object detection unavailable: {:#}", e);
            Box::new(UnavailableBackend::new("yolo", format!("{:#}", e)))
        }
    };

    let texts: Box<dyn TextDetector> = match LocalOcr::from_settings(settings) {
        Ok(ocr) => {
            info!("Local OCR ready");
            Box::new(ocr)
        }
        Err(e) => {
            warn!("Local OCR unavailable: {:#}", e);
            Box::new(UnavailableBackend::new("paddle-ocr", format!("{:#}", e)))
        }
    };

    BackendPair::new(objects, texts)
}
