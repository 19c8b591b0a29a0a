//! Local object detection
//!
//! Runs a YOLOv8 ONNX export on the frame. The raw head output holds one
//! column per anchor: box center/size followed by one score per class.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::time::Instant;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::preprocess_for_yolo;
use crate::config::LocalSettings;
use crate::detect::{BoundingBox, CoordinateSpace, ObjectDetector, RawObject};

/// Square input size of the exported model
pub const YOLO_INPUT_SIZE: u32 = 640;

/// Class names of the COCO-trained YOLOv8 models
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Score and overlap thresholds for decoding the head output
#[derive(Debug, Clone, Copy)]
pub struct YoloThresholds {
    /// Minimum best-class score
    pub confidence: f32,
    /// Same-class boxes overlapping more than this are suppressed
    pub iou: f32,
}

impl Default for YoloThresholds {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.45,
        }
    }
}

/// Decoded box before labeling, in source pixels
#[derive(Debug, Clone, PartialEq)]
pub struct YoloBox {
    pub class_id: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Decode a YOLOv8 head output into source-pixel boxes.
///
/// Accepts both `[1, 4 + C, N]` (the export default) and the transposed
/// `[1, N, 4 + C]`; the smaller of the two trailing axes is the attribute axis.
pub fn decode_output(
    shape: &[usize],
    data: &[f32],
    num_classes: usize,
    source: (u32, u32),
    input_size: u32,
    thresholds: YoloThresholds,
) -> Result<Vec<YoloBox>> {
    let (rows, cols) = match shape {
        [1, rows, cols] => (*rows, *cols),
        other => anyhow::bail!("Unexpected detector output shape {:?}", other),
    };
    if rows * cols > data.len() {
        anyhow::bail!("Detector output has {} values for shape {:?}", data.len(), shape);
    }

    let attributes = 4 + num_classes;
    let (anchors, transposed) = if rows == attributes {
        (cols, false)
    } else if cols == attributes {
        (rows, true)
    } else {
        anyhow::bail!(
            "Detector output {:?} does not match {} classes",
            shape,
            num_classes
        );
    };

    let at = |attr: usize, anchor: usize| -> f32 {
        if transposed {
            data[anchor * attributes + attr]
        } else {
            data[attr * anchors + anchor]
        }
    };

    let scale_x = source.0 as f32 / input_size as f32;
    let scale_y = source.1 as f32 / input_size as f32;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let Some((class_id, confidence)) = (0..num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if confidence < thresholds.confidence {
            continue;
        }

        let (cx, cy) = (at(0, anchor), at(1, anchor));
        let (w, h) = (at(2, anchor), at(3, anchor));

        candidates.push(YoloBox {
            class_id,
            bbox: BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
            confidence,
        });
    }

    Ok(nms(candidates, thresholds.iou))
}

/// Class-wise non-maximum suppression, highest confidence first
pub fn nms(mut boxes: Vec<YoloBox>, iou_threshold: f32) -> Vec<YoloBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<YoloBox> = Vec::new();
    for candidate in boxes {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Offline object backend
pub struct LocalDetector {
    session: OnnxSession,
    labels: Vec<String>,
    thresholds: YoloThresholds,
}

impl LocalDetector {
    pub fn from_settings(settings: &LocalSettings) -> Result<Self> {
        let model = settings
            .detector_model
            .as_ref()
            .context("No detector model configured (local.detector_model)")?;

        Ok(Self {
            session: OnnxSession::new(model, settings.use_gpu)?,
            labels: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            thresholds: YoloThresholds {
                confidence: settings.object_confidence,
                iou: settings.iou_threshold,
            },
        })
    }
}

impl ObjectDetector for LocalDetector {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawObject>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let tensor = preprocess_for_yolo(image, YOLO_INPUT_SIZE);
        let (shape, data) = self.session.run(tensor)?;

        let boxes = decode_output(
            &shape,
            &data,
            self.labels.len(),
            image.dimensions(),
            YOLO_INPUT_SIZE,
            self.thresholds,
        )?;

        debug!("YOLO found {} objects in {:?}", boxes.len(), start.elapsed());

        Ok(boxes
            .into_iter()
            .map(|b| RawObject {
                label: self
                    .labels
                    .get(b.class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class {}", b.class_id)),
                bbox: b.bbox,
                space: CoordinateSpace::Pixels,
                confidence: b.confidence,
            })
            .collect())
    }
}
