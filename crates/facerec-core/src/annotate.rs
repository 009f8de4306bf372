//! Draws recognition results onto a frame.
//!
//! Text uses a built-in 5×7 bitmap font scaled by the line width, so no font
//! files are needed at runtime. Lowercase letters render as uppercase and
//! characters without a glyph render as a hollow box.

use crate::pipeline::{FaceStatus, FrameReport};
use crate::types::FaceRegion;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

/// Box and label colour (blue).
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Label drawn over faces not found in the database.
pub const UNKNOWN_MARKER: &str = "404";

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_W + 1;

/// Stroke width for boxes and text on a frame `rows` pixels tall.
pub fn line_width(rows: u32) -> u32 {
    ((rows as f32 * 0.005) as u32).max(1)
}

/// Draw every face of `report` onto `image`.
///
/// Skipped faces get a box but no label.
pub fn annotate(image: &mut RgbImage, report: &FrameReport) {
    let lw = line_width(image.height());
    for face in &report.faces {
        draw_box(image, &face.region, lw, BOX_COLOR);

        let text = match &face.status {
            FaceStatus::Recognized { label, .. } => label.as_str(),
            FaceStatus::Unknown { .. } => UNKNOWN_MARKER,
            FaceStatus::Skipped(_) => continue,
        };
        let (x, baseline) = label_origin(&face.region, lw);
        draw_text(image, text, x, baseline, lw, BOX_COLOR);
    }
}

/// Baseline-left origin of a face's label: above the box when there is room,
/// otherwise just inside its top edge.
fn label_origin(region: &FaceRegion, lw: u32) -> (i32, i32) {
    let lw = lw as i32;
    let x = region.x.round() as i32 + lw;
    let top = region.y.round() as i32;
    if top - 12 * lw > 0 {
        (x, top - 4 * lw)
    } else {
        (x, top + 12 * lw)
    }
}

/// Hollow rectangle `lw` pixels thick, centred on the region outline.
fn draw_box(image: &mut RgbImage, region: &FaceRegion, lw: u32, color: Rgb<u8>) {
    let x0 = region.x.round() as i32;
    let y0 = region.y.round() as i32;
    let x1 = (region.x + region.width - 1.0).round() as i32;
    let y1 = (region.y + region.height - 1.0).round() as i32;

    let half = lw as i32 / 2;
    for t in 0..lw as i32 {
        let inset = t - half;
        let w = x1 - x0 + 1 - 2 * inset;
        let h = y1 - y0 + 1 - 2 * inset;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Render `text` with its baseline at `baseline`, each font pixel drawn as
/// a `scale`×`scale` square. Pixels outside the image are clipped.
pub fn draw_text(image: &mut RgbImage, text: &str, x: i32, baseline: i32, scale: u32, color: Rgb<u8>) {
    let s = scale.max(1) as i32;
    let top = baseline - GLYPH_H * s;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * GLYPH_ADVANCE * s;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                let rect = Rect::at(origin_x + col * s, top + row as i32 * s)
                    .of_size(s as u32, s as u32);
                draw_filled_rect_mut(image, rect, color);
            }
        }
    }
}

/// Rows of a glyph, top to bottom; bit 4 is the leftmost column.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignError;
    use crate::pipeline::FaceOutcome;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn outcome(region: FaceRegion, status: FaceStatus) -> FaceOutcome {
        FaceOutcome {
            region,
            status,
            crop: None,
        }
    }

    #[test]
    fn test_line_width() {
        assert_eq!(line_width(100), 1);
        assert_eq!(line_width(480), 2);
        assert_eq!(line_width(1080), 5);
    }

    #[test]
    fn test_recognized_label_above_box() {
        let mut image = RgbImage::new(100, 100);
        let report = FrameReport {
            faces: vec![outcome(
                FaceRegion::new(20.0, 40.0, 30.0, 30.0),
                FaceStatus::Recognized {
                    label: "alice".into(),
                    distance: 0.0,
                },
            )],
        };
        annotate(&mut image, &report);

        // Box corners.
        assert_eq!(image.get_pixel(20, 40), &BOX_COLOR);
        assert_eq!(image.get_pixel(49, 69), &BOX_COLOR);
        assert_eq!(image.get_pixel(35, 55), &BLACK);
        // Top row of 'A' (0x0E) starts one column into the glyph, baseline at 36.
        assert_eq!(image.get_pixel(21, 29), &BLACK);
        assert_eq!(image.get_pixel(22, 29), &BOX_COLOR);
    }

    #[test]
    fn test_unknown_marker_inside_box_near_top() {
        let mut image = RgbImage::new(100, 100);
        let report = FrameReport {
            faces: vec![outcome(
                FaceRegion::new(20.0, 5.0, 40.0, 40.0),
                FaceStatus::Unknown { distance: 5.12 },
            )],
        };
        annotate(&mut image, &report);

        // '4' top row is 0x02, baseline at 5 + 12 = 17, glyph top at 10.
        assert_eq!(image.get_pixel(24, 10), &BOX_COLOR);
        assert_eq!(image.get_pixel(23, 10), &BLACK);
    }

    #[test]
    fn test_skipped_face_has_box_only() {
        let mut image = RgbImage::new(100, 100);
        let report = FrameReport {
            faces: vec![outcome(
                FaceRegion::new(20.0, 40.0, 30.0, 30.0),
                FaceStatus::Skipped(AlignError::IncompleteLandmarks(12)),
            )],
        };
        annotate(&mut image, &report);

        assert_eq!(image.get_pixel(20, 40), &BOX_COLOR);
        for y in 0..40 {
            for x in 0..100 {
                assert_eq!(image.get_pixel(x, y), &BLACK, "unexpected ink at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_text_clips_at_image_edge() {
        let mut image = RgbImage::new(8, 8);
        draw_text(&mut image, "WHO ARE YOU ?", -3, 7, 2, BOX_COLOR);
        draw_text(&mut image, "x", 100, 100, 1, BOX_COLOR);
    }

    #[test]
    fn test_lowercase_and_fallback_glyphs() {
        assert_eq!(glyph('a'), glyph('A'));
        assert_eq!(glyph('#'), glyph('\u{e9}'));
    }
}
