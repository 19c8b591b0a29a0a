//! Overlay compositing of detections onto a frame

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BoundingBox, Detection, DetectionKind, Region};

/// Outline color for object boxes
pub const OBJECT_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
/// Outline color for text polygons
pub const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
/// Outline thickness in pixels
const LINE_THICKNESS: i32 = 2;
/// Gap between a label's baseline and the top of its region
const LABEL_GAP: f32 = 6.0;
/// Text labels are cut to this many characters
const MAX_TEXT_LABEL_CHARS: usize = 15;

/// Font used to caption detections on the overlay
pub struct LabelFont {
    font: FontVec,
    object_scale: PxScale,
    text_scale: PxScale,
}

impl LabelFont {
    /// Load a TrueType/OpenType font from disk
    pub fn load(path: &Path, object_size: f32, text_size: f32) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read label font {:?}", path))?;
        Self::from_bytes(data, object_size, text_size)
            .with_context(|| format!("Invalid label font {:?}", path))
    }

    /// Parse font data; sizes are pixel heights
    pub fn from_bytes(data: Vec<u8>, object_size: f32, text_size: f32) -> Result<Self> {
        let font = FontVec::try_from_vec(data)?;
        Ok(Self {
            font,
            object_scale: PxScale::from(object_size),
            text_scale: PxScale::from(text_size),
        })
    }

    /// Draw `label` with its baseline just above `(x, y)`, kept inside the top edge
    fn draw(&self, canvas: &mut RgbaImage, label: &str, x: f32, y: f32, scale: PxScale, color: Rgba<u8>) {
        let ascent = self.font.as_scaled(scale).ascent();
        let baseline = (y - LABEL_GAP).max(ascent);
        let top = baseline - ascent;
        draw_text_mut(
            canvas,
            color,
            x.round() as i32,
            top.round() as i32,
            scale,
            &self.font,
            label,
        );
    }
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont")
            .field("object_scale", &self.object_scale)
            .field("text_scale", &self.text_scale)
            .finish()
    }
}

/// Draw objects then texts onto a copy of the source frame.
///
/// The source is never touched; objects go first so text outlines stay
/// visible on top. Labels are drawn only when a font is given.
pub fn composite(
    source: &RgbaImage,
    objects: &[Detection],
    texts: &[Detection],
    font: Option<&LabelFont>,
) -> RgbaImage {
    let mut canvas = source.clone();

    for detection in objects.iter().chain(texts.iter()) {
        let color = match detection.kind {
            DetectionKind::Object => OBJECT_COLOR,
            DetectionKind::Text => TEXT_COLOR,
        };
        draw_region(&mut canvas, &detection.region, color);
        if let Some(font) = font {
            draw_label(&mut canvas, detection, font, color);
        }
    }

    canvas
}

fn draw_label(canvas: &mut RgbaImage, detection: &Detection, font: &LabelFont, color: Rgba<u8>) {
    let label = detection.label.trim();
    if label.is_empty() {
        return;
    }

    match (&detection.region, detection.kind) {
        (Region::Box(bbox), _) => {
            font.draw(canvas, label, bbox.x1, bbox.y1, font.object_scale, color);
        }
        (Region::Polygon(points), kind) => {
            let Some(&(x, y)) = points.first() else {
                return;
            };
            let scale = match kind {
                DetectionKind::Object => font.object_scale,
                DetectionKind::Text => font.text_scale,
            };
            let short: String = label.chars().take(MAX_TEXT_LABEL_CHARS).collect();
            font.draw(canvas, &short, x, y, scale, color);
        }
    }
}

fn draw_region(canvas: &mut RgbaImage, region: &Region, color: Rgba<u8>) {
    match region {
        Region::Box(bbox) => draw_box(canvas, bbox, color),
        Region::Polygon(points) => draw_polygon(canvas, points, color),
    }
}

fn draw_box(canvas: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>) {
    for inset in 0..LINE_THICKNESS {
        let x = bbox.x1.round() as i32 + inset;
        let y = bbox.y1.round() as i32 + inset;
        let w = bbox.width().round() as i32 - 2 * inset;
        let h = bbox.height().round() as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w as u32, h as u32), color);
    }
}

fn draw_polygon(canvas: &mut RgbaImage, points: &[(f32, f32)], color: Rgba<u8>) {
    if points.len() < 2 {
        return;
    }
    for i in 0..points.len() {
        let start = points[i];
        let end = points[(i + 1) % points.len()];
        for offset in 0..LINE_THICKNESS {
            let d = offset as f32;
            draw_line_segment_mut(canvas, (start.0 + d, start.1), (end.0 + d, end.1), color);
            draw_line_segment_mut(canvas, (start.0, start.1 + d), (end.0, end.1 + d), color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_font() -> LabelFont {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/fonts/DejaVuSans.ttf");
        LabelFont::load(&path, 18.0, 15.0).unwrap()
    }

    fn has_color_in(image: &RgbaImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> bool {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .any(|(x, y)| image.get_pixel(x, y) != &Rgba([0, 0, 0, 255]))
    }

    fn object(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            kind: DetectionKind::Object,
            label: "box".to_string(),
            region: Region::Box(BoundingBox::new(x1, y1, x2, y2)),
            confidence: 0.9,
        }
    }

    fn text(points: Vec<(f32, f32)>) -> Detection {
        Detection {
            kind: DetectionKind::Text,
            label: "text".to_string(),
            region: Region::Polygon(points),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_composite_leaves_source_untouched() {
        let source = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let annotated = composite(&source, &[object(2.0, 2.0, 12.0, 12.0)], &[], None);

        assert_eq!(source.get_pixel(2, 2), &Rgba([0, 0, 0, 255]));
        assert_eq!(annotated.get_pixel(2, 2), &OBJECT_COLOR);
        assert_eq!(annotated.get_pixel(7, 7), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_text_drawn_over_objects() {
        let source = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let square = vec![(2.0, 2.0), (12.0, 2.0), (12.0, 12.0), (2.0, 12.0)];
        let annotated = composite(&source, &[object(2.0, 2.0, 12.0, 12.0)], &[text(square)], None);

        assert_eq!(annotated.get_pixel(2, 2), &TEXT_COLOR);
    }

    #[test]
    fn test_out_of_bounds_regions_do_not_panic() {
        let source = RgbaImage::new(10, 10);
        let far = vec![(50.0, 50.0), (60.0, 50.0), (60.0, 60.0), (50.0, 60.0)];
        let font = label_font();
        let annotated = composite(
            &source,
            &[object(-5.0, -5.0, 40.0, 40.0)],
            &[text(far)],
            Some(&font),
        );
        assert_eq!(annotated.dimensions(), (10, 10));
    }

    #[test]
    fn test_object_label_drawn_above_box() {
        let source = RgbaImage::from_pixel(100, 60, Rgba([0, 0, 0, 255]));
        let font = label_font();
        let annotated = composite(&source, &[object(10.0, 40.0, 60.0, 58.0)], &[], Some(&font));

        assert!(has_color_in(&annotated, 10..60, 0..38));
        // Label pixels carry the object color only
        let labelled = (0..38)
            .flat_map(|y| (10..60).map(move |x| (x, y)))
            .map(|(x, y)| annotated.get_pixel(x, y))
            .filter(|p| **p != Rgba([0, 0, 0, 255]))
            .all(|p| p[0] == 0 && p[2] == 0 && p[1] > 0);
        assert!(labelled);
    }

    #[test]
    fn test_no_font_draws_outlines_only() {
        let source = RgbaImage::from_pixel(100, 60, Rgba([0, 0, 0, 255]));
        let annotated = composite(&source, &[object(10.0, 40.0, 60.0, 58.0)], &[], None);

        assert!(!has_color_in(&annotated, 0..100, 0..38));
    }

    #[test]
    fn test_text_label_is_truncated() {
        let source = RgbaImage::from_pixel(400, 60, Rgba([0, 0, 0, 255]));
        let font = label_font();
        let polygon = vec![(5.0, 40.0), (50.0, 40.0), (50.0, 55.0), (5.0, 55.0)];
        let mut long = text(polygon.clone());
        long.label = "ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string();
        let mut short = text(polygon);
        short.label = "ABCDEFGHIJKLMNO".to_string();

        let a = composite(&source, &[], &[long], Some(&font));
        let b = composite(&source, &[], &[short], Some(&font));

        assert!(has_color_in(&a, 5..400, 0..38));
        assert_eq!(a, b);
    }
}
