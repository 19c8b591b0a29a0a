//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime: a DBNet detector produces a text
//! probability map, each text box is cropped and fed to a CRNN recognizer,
//! and the recognizer output is CTC-decoded against the character dictionary.

use anyhow::{Context, Result};
use image::RgbaImage;
use ndarray::Array3;
use std::collections::VecDeque;
use std::path::Path;
use tracing::debug;

use super::models::{ModelManager, ModelType, OnnxSession};
use super::preprocess::{
    crop_polygon, preprocess_for_detection, preprocess_for_recognition, rgba_to_rgb_f32,
    PreprocessConfig,
};
use crate::config::LocalSettings;
use crate::detect::{CoordinateSpace, RawText, TextDetector};

/// Components smaller than this are noise
const MIN_COMPONENT_PIXELS: usize = 10;
/// Boxes with a side shorter than this (source pixels) are dropped
const MIN_BOX_SIDE: f32 = 3.0;
/// How far a box is grown past its component, as DBNet shrinks text regions
const UNCLIP_RATIO: f32 = 1.5;
/// Boxes whose top edges are this close share a text line
const LINE_TOLERANCE: f32 = 10.0;

/// Text box thresholds for the DB postprocess
#[derive(Debug, Clone, Copy)]
pub struct DbThresholds {
    /// Probability above which a pixel counts as text
    pub pixel: f32,
    /// Minimum mean probability over a component
    pub box_score: f32,
}

impl Default for DbThresholds {
    fn default() -> Self {
        Self {
            pixel: 0.3,
            box_score: 0.6,
        }
    }
}

/// Single OCR detection result
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Recognized text
    pub text: String,
    /// Bounding polygon points, clockwise from top-left
    pub polygon: Vec<(f32, f32)>,
    /// Recognition confidence
    pub confidence: f32,
}

/// Text box found by the detector, in source pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub polygon: Vec<(f32, f32)>,
    pub score: f32,
}

/// PaddleOCR engine: detection then recognition
pub struct OcrEngine {
    det: OnnxSession,
    rec: OnnxSession,
    charset: Vec<String>,
    preprocess: PreprocessConfig,
    thresholds: DbThresholds,
}

impl OcrEngine {
    pub fn new(
        det_model: &Path,
        rec_model: &Path,
        dictionary: &Path,
        thresholds: DbThresholds,
        use_gpu: bool,
    ) -> Result<Self> {
        let dict = std::fs::read_to_string(dictionary)
            .with_context(|| format!("Failed to read dictionary {:?}", dictionary))?;

        Ok(Self {
            det: OnnxSession::new(det_model, use_gpu)?,
            rec: OnnxSession::new(rec_model, use_gpu)?,
            charset: load_charset(&dict),
            preprocess: PreprocessConfig::default(),
            thresholds,
        })
    }

    /// Run OCR on an RGBA image
    pub fn recognize(&mut self, image: &RgbaImage) -> Result<Vec<OcrResult>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let rgb = rgba_to_rgb_f32(image.as_raw(), width, height);

        let boxes = self.detect_boxes(&rgb, (width, height))?;
        debug!("Text detector found {} boxes", boxes.len());

        let mut results = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let crop = crop_polygon(&rgb, &text_box.polygon);
            let tensor = preprocess_for_recognition(&crop, &self.preprocess);
            let (shape, probs) = self.rec.run(tensor)?;

            let (steps, classes) = match shape.as_slice() {
                [_, steps, classes] => (*steps, *classes),
                other => anyhow::bail!("Unexpected recognizer output shape {:?}", other),
            };

            let (text, confidence) = ctc_greedy_decode(&probs, steps, classes, &self.charset);
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            results.push(OcrResult {
                text,
                polygon: text_box.polygon,
                confidence,
            });
        }

        Ok(results)
    }

    fn detect_boxes(&mut self, rgb: &Array3<f32>, source: (u32, u32)) -> Result<Vec<TextBox>> {
        let (tensor, scale, valid) = preprocess_for_detection(rgb, &self.preprocess);
        let (shape, prob) = self.det.run(tensor)?;

        let map_w = match shape.as_slice() {
            [_, _, _, w] => *w,
            other => anyhow::bail!("Unexpected detector output shape {:?}", other),
        };

        let mut boxes = db_postprocess(&prob, map_w, valid, scale, source, self.thresholds);
        sort_reading_order(&mut boxes);
        Ok(boxes)
    }
}

/// Character table for CTC decoding: blank, the dictionary lines, then space
pub fn load_charset(dictionary: &str) -> Vec<String> {
    let mut charset = vec![String::new()];
    charset.extend(
        dictionary
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    charset.push(" ".to_string());
    charset
}

/// Greedy CTC decode of a `[steps, classes]` probability matrix.
///
/// Returns the text and the mean probability of the emitted characters.
pub fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for t in 0..steps {
        let Some(row) = probs.get(t * classes..(t + 1) * classes) else {
            break;
        };
        let (index, score) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && index != previous {
            if let Some(ch) = charset.get(index) {
                text.push_str(ch);
                scores.push(score);
            }
        }
        previous = index;
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    (text, confidence)
}

/// Turn a DBNet probability map into scored text boxes in source pixels.
///
/// `map_w` is the row stride of `prob`; only the top-left `valid` (h, w)
/// region holds image content, the rest is padding.
pub fn db_postprocess(
    prob: &[f32],
    map_w: usize,
    valid: (usize, usize),
    scale: f32,
    source: (u32, u32),
    thresholds: DbThresholds,
) -> Vec<TextBox> {
    let (valid_h, valid_w) = valid;
    let valid_w = valid_w.min(map_w);
    let valid_h = valid_h.min(if map_w == 0 { 0 } else { prob.len() / map_w });
    let (src_w, src_h) = (source.0 as f32, source.1 as f32);

    let mut visited = vec![false; valid_h * valid_w];
    let mut boxes = Vec::new();

    for start_y in 0..valid_h {
        for start_x in 0..valid_w {
            let seed = start_y * valid_w + start_x;
            if visited[seed] || prob[start_y * map_w + start_x] <= thresholds.pixel {
                continue;
            }

            // 4-connected flood fill over above-threshold pixels
            let mut queue = VecDeque::from([(start_x, start_y)]);
            visited[seed] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (start_x, start_y, start_x, start_y);
            let mut count = 0usize;
            let mut score_sum = 0.0f32;

            while let Some((x, y)) = queue.pop_front() {
                count += 1;
                score_sum += prob[y * map_w + x];
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let neighbors = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx >= valid_w || ny >= valid_h {
                        continue;
                    }
                    let idx = ny * valid_w + nx;
                    if !visited[idx] && prob[ny * map_w + nx] > thresholds.pixel {
                        visited[idx] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            if count < MIN_COMPONENT_PIXELS {
                continue;
            }
            let score = score_sum / count as f32;
            if score < thresholds.box_score {
                continue;
            }

            let (x1, y1) = (min_x as f32, min_y as f32);
            let (x2, y2) = ((max_x + 1) as f32, (max_y + 1) as f32);
            let (w, h) = (x2 - x1, y2 - y1);
            let grow = w * h * UNCLIP_RATIO / (2.0 * (w + h));

            let left = ((x1 - grow) / scale).clamp(0.0, src_w);
            let top = ((y1 - grow) / scale).clamp(0.0, src_h);
            let right = ((x2 + grow) / scale).clamp(0.0, src_w);
            let bottom = ((y2 + grow) / scale).clamp(0.0, src_h);

            if right - left < MIN_BOX_SIDE || bottom - top < MIN_BOX_SIDE {
                continue;
            }

            boxes.push(TextBox {
                polygon: vec![(left, top), (right, top), (right, bottom), (left, bottom)],
                score,
            });
        }
    }

    boxes
}

/// Order boxes top-to-bottom, then left-to-right within a line
pub fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| a.polygon[0].1.total_cmp(&b.polygon[0].1));

    let mut line_start = 0;
    while line_start < boxes.len() {
        let line_top = boxes[line_start].polygon[0].1;
        let line_end = boxes[line_start..]
            .iter()
            .position(|b| b.polygon[0].1 - line_top > LINE_TOLERANCE)
            .map_or(boxes.len(), |offset| line_start + offset);

        boxes[line_start..line_end].sort_by(|a, b| a.polygon[0].0.total_cmp(&b.polygon[0].0));
        line_start = line_end;
    }
}

/// Offline text backend
pub struct LocalOcr {
    engine: OcrEngine,
}

impl LocalOcr {
    /// Load the OCR models, downloading any that are missing
    pub fn from_settings(settings: &LocalSettings) -> Result<Self> {
        let manager = match &settings.models_dir {
            Some(dir) => ModelManager::with_dir(dir.clone())?,
            None => ModelManager::new()?,
        };

        let det = manager.ensure_model(ModelType::Detection)?;
        let rec = manager.ensure_model(ModelType::Recognition)?;
        let dict = manager.ensure_model(ModelType::Dictionary)?;

        let thresholds = DbThresholds {
            pixel: settings.det_threshold,
            box_score: settings.box_threshold,
        };

        Ok(Self {
            engine: OcrEngine::new(&det, &rec, &dict, thresholds, settings.use_gpu)?,
        })
    }
}

impl TextDetector for LocalOcr {
    fn name(&self) -> &'static str {
        "paddle-ocr"
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawText>> {
        Ok(self
            .engine
            .recognize(image)?
            .into_iter()
            .map(|r| RawText {
                text: r.text,
                polygon: r.polygon,
                space: CoordinateSpace::Pixels,
                confidence: r.confidence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charset() -> Vec<String> {
        load_charset("a\nb\nc\n")
    }

    /// One-hot probability rows for the given class indices
    fn one_hot(indices: &[usize], classes: usize) -> Vec<f32> {
        let mut probs = vec![0.0; indices.len() * classes];
        for (t, &i) in indices.iter().enumerate() {
            probs[t * classes + i] = 0.9;
        }
        probs
    }

    #[test]
    fn test_charset_layout() {
        let charset = charset();
        assert_eq!(charset.len(), 5);
        assert_eq!(charset[0], "");
        assert_eq!(charset[1], "a");
        assert_eq!(charset[4], " ");
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        // a a _ a b b _ space c
        let probs = one_hot(&[1, 1, 0, 1, 2, 2, 0, 4, 3], 5);
        let (text, confidence) = ctc_greedy_decode(&probs, 9, 5, &charset());
        assert_eq!(text, "aab c");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank_is_empty() {
        let probs = one_hot(&[0, 0, 0], 5);
        let (text, confidence) = ctc_greedy_decode(&probs, 3, 5, &charset());
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_db_postprocess_finds_and_scales_block() {
        // 32x32 map, text block at x 4..20, y 8..14, scale 2 (source 16x16)
        let map_w = 32;
        let mut prob = vec![0.0f32; 32 * 32];
        for y in 8..14 {
            for x in 4..20 {
                prob[y * map_w + x] = 0.9;
            }
        }

        let boxes = db_postprocess(&prob, map_w, (32, 32), 2.0, (16, 16), DbThresholds::default());
        assert_eq!(boxes.len(), 1);

        let text_box = &boxes[0];
        assert!((text_box.score - 0.9).abs() < 1e-6);
        assert_eq!(text_box.polygon.len(), 4);

        // Unclip grows the box: 16x6 component, grow = 96*1.5/44
        let grow = 96.0 * 1.5 / 44.0;
        let (left, top) = text_box.polygon[0];
        assert!((left - (4.0 - grow) / 2.0).abs() < 1e-4);
        assert!((top - (8.0 - grow) / 2.0).abs() < 1e-4);
        let (right, bottom) = text_box.polygon[2];
        assert!((right - (20.0 + grow) / 2.0).abs() < 1e-4);
        assert!((bottom - (14.0 + grow) / 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_db_postprocess_drops_weak_and_tiny_components() {
        let map_w = 32;
        let mut prob = vec![0.0f32; 32 * 32];
        // Weak: passes pixel threshold, fails box score
        for y in 2..8 {
            for x in 2..20 {
                prob[y * map_w + x] = 0.4;
            }
        }
        // Tiny: 2x2
        for y in 20..22 {
            for x in 20..22 {
                prob[y * map_w + x] = 0.95;
            }
        }

        let boxes = db_postprocess(&prob, map_w, (32, 32), 1.0, (32, 32), DbThresholds::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_db_postprocess_ignores_padding() {
        let map_w = 32;
        let mut prob = vec![0.0f32; 32 * 32];
        for y in 0..10 {
            for x in 24..32 {
                prob[y * map_w + x] = 0.9;
            }
        }

        let boxes = db_postprocess(&prob, map_w, (32, 20), 1.0, (20, 32), DbThresholds::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_reading_order() {
        let make = |x: f32, y: f32| TextBox {
            polygon: vec![(x, y), (x + 10.0, y), (x + 10.0, y + 5.0), (x, y + 5.0)],
            score: 1.0,
        };
        let mut boxes = vec![make(50.0, 100.0), make(80.0, 12.0), make(10.0, 15.0)];
        sort_reading_order(&mut boxes);

        let origins: Vec<_> = boxes.iter().map(|b| b.polygon[0]).collect();
        assert_eq!(origins, vec![(10.0, 15.0), (80.0, 12.0), (50.0, 100.0)]);
    }
}
