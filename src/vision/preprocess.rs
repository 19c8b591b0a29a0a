//! Image preprocessing for the local ONNX models
//!
//! Handles resizing, normalization and tensor conversion for the YOLO object
//! detector and the PaddleOCR text detector/recognizer.

use image::RgbaImage;
use ndarray::{Array3, Array4};

/// Preprocessing configuration for the OCR models
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side for the text detection model
    pub det_target_size: u32,
    /// Target height for the recognition model
    pub rec_target_height: u32,
    /// Maximum width for recognition crops
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // PaddleOCR maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert RGBA image data to an HWC RGB f32 array in [0, 1]
pub fn rgba_to_rgb_f32(data: &[u8], width: u32, height: u32) -> Array3<f32> {
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 4;
            if idx + 2 < data.len() {
                rgb[[y, x, 0]] = data[idx] as f32 / 255.0;
                rgb[[y, x, 1]] = data[idx + 1] as f32 / 255.0;
                rgb[[y, x, 2]] = data[idx + 2] as f32 / 255.0;
            }
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Bilinear sample of an HWC image at fractional coordinates
fn sample_bilinear(image: &Array3<f32>, src_y: f32, src_x: f32, ch: usize) -> f32 {
    let (h, w, _) = image.dim();
    let y0 = (src_y.floor() as usize).min(h - 1);
    let y1 = (y0 + 1).min(h - 1);
    let x0 = (src_x.floor() as usize).min(w - 1);
    let x1 = (x0 + 1).min(w - 1);

    let fy = src_y - y0 as f32;
    let fx = src_x - x0 as f32;

    let v0 = image[[y0, x0, ch]] * (1.0 - fx) + image[[y0, x1, ch]] * fx;
    let v1 = image[[y1, x0, ch]] * (1.0 - fx) + image[[y1, x1, ch]] * fx;
    v0 * (1.0 - fy) + v1 * fy
}

/// Resize for text detection, keeping aspect ratio and padding each side up
/// to a multiple of 32. Returns (padded_image, scale, (resized_h, resized_w)).
pub fn resize_for_detection(
    image: &Array3<f32>,
    target_size: u32,
) -> (Array3<f32>, f32, (usize, usize)) {
    let (h, w, c) = image.dim();
    if h == 0 || w == 0 {
        return (Array3::<f32>::zeros((32, 32, c)), 1.0, (0, 0));
    }
    let (hf, wf) = (h as f32, w as f32);

    let scale = target_size as f32 / hf.max(wf);
    let new_h = ((hf * scale) as usize).max(1);
    let new_w = ((wf * scale) as usize).max(1);

    let padded_h = new_h.div_ceil(32) * 32;
    let padded_w = new_w.div_ceil(32) * 32;

    let mut resized = Array3::<f32>::zeros((padded_h, padded_w, c));

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale).min(hf - 1.0);
            let src_x = (x as f32 / scale).min(wf - 1.0);
            for ch in 0..c {
                resized[[y, x, ch]] = sample_bilinear(image, src_y, src_x, ch);
            }
        }
    }

    (resized, scale, (new_h, new_w))
}

/// Resize a crop for the recognition model (fixed height, variable width)
pub fn resize_for_recognition(
    image: &Array3<f32>,
    target_height: u32,
    max_width: u32,
) -> Array3<f32> {
    let (h, w, c) = image.dim();
    if h == 0 || w == 0 {
        return Array3::<f32>::zeros((target_height as usize, 1, c));
    }
    let (hf, wf) = (h as f32, w as f32);

    let scale = target_height as f32 / hf;
    let new_w = ((wf * scale) as u32).clamp(1, max_width) as usize;
    let new_h = target_height as usize;

    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale).min(hf - 1.0);
            let src_x = (x as f32 / scale).min(wf - 1.0);
            for ch in 0..c {
                resized[[y, x, ch]] = sample_bilinear(image, src_y, src_x, ch);
            }
        }
    }

    resized
}

/// Crop the bounding rectangle of a polygon out of an HWC image
pub fn crop_polygon(image: &Array3<f32>, polygon: &[(f32, f32)]) -> Array3<f32> {
    let min_x = polygon.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = polygon.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = polygon.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = polygon.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    let (img_h, img_w, c) = image.dim();

    let x1 = (min_x.max(0.0) as usize).min(img_w.saturating_sub(1));
    let y1 = (min_y.max(0.0) as usize).min(img_h.saturating_sub(1));
    let x2 = (max_x.max(0.0) as usize).min(img_w);
    let y2 = (max_y.max(0.0) as usize).min(img_h);

    let crop_w = x2.saturating_sub(x1);
    let crop_h = y2.saturating_sub(y1);

    if crop_w == 0 || crop_h == 0 {
        return Array3::<f32>::zeros((1, 1, c));
    }

    let mut cropped = Array3::<f32>::zeros((crop_h, crop_w, c));

    for y in 0..crop_h {
        for x in 0..crop_w {
            for ch in 0..c {
                cropped[[y, x, ch]] = image[[y1 + y, x1 + x, ch]];
            }
        }
    }

    cropped
}

/// Full preprocessing pipeline for text detection.
/// Returns (tensor, scale, (resized_h, resized_w)).
pub fn preprocess_for_detection(
    rgb: &Array3<f32>,
    config: &PreprocessConfig,
) -> (Array4<f32>, f32, (usize, usize)) {
    let (resized, scale, valid) = resize_for_detection(rgb, config.det_target_size);
    let normalized = normalize(&resized, &config.mean, &config.std);
    (hwc_to_nchw(&normalized), scale, valid)
}

/// Full preprocessing pipeline for text recognition
pub fn preprocess_for_recognition(image: &Array3<f32>, config: &PreprocessConfig) -> Array4<f32> {
    let resized = resize_for_recognition(image, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}

/// Stretch an RGBA image to a square model input, NCHW in [0, 1]
pub fn preprocess_for_yolo(image: &RgbaImage, input_size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(
        image,
        input_size,
        input_size,
        image::imageops::FilterType::Triangle,
    );

    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}
