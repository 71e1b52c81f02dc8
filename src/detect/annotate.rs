//! Draw detections onto a copy of a frame.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::detect::result::{Detection, DetectionSet};
use crate::frame::Frame;

const OUTLINE_PX: u32 = 2;
const GLYPH_SCALE: u32 = 2;
const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
const LABEL_PAD: u32 = 2;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [72, 249, 10],
    [0, 194, 255],
    [255, 178, 29],
    [207, 210, 49],
    [146, 204, 23],
    [255, 55, 199],
    [132, 56, 255],
];

// 3x5 bitmaps, one row per entry, bit 2 is the left column.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];
const PERCENT: [u8; 5] = [0b101, 0b001, 0b010, 0b100, 0b101];
// Class names are drawn in capitals; lowercase input maps onto these.
const LETTERS: [[u8; 5]; 26] = [
    [0b010, 0b101, 0b111, 0b101, 0b101],
    [0b110, 0b101, 0b110, 0b101, 0b110],
    [0b011, 0b100, 0b100, 0b100, 0b011],
    [0b110, 0b101, 0b101, 0b101, 0b110],
    [0b111, 0b100, 0b110, 0b100, 0b111],
    [0b111, 0b100, 0b110, 0b100, 0b100],
    [0b011, 0b100, 0b101, 0b101, 0b011],
    [0b101, 0b101, 0b111, 0b101, 0b101],
    [0b111, 0b010, 0b010, 0b010, 0b111],
    [0b001, 0b001, 0b001, 0b101, 0b010],
    [0b101, 0b101, 0b110, 0b101, 0b101],
    [0b100, 0b100, 0b100, 0b100, 0b111],
    [0b101, 0b111, 0b111, 0b101, 0b101],
    [0b110, 0b101, 0b101, 0b101, 0b101],
    [0b010, 0b101, 0b101, 0b101, 0b010],
    [0b110, 0b101, 0b110, 0b100, 0b100],
    [0b010, 0b101, 0b101, 0b110, 0b011],
    [0b110, 0b101, 0b110, 0b101, 0b101],
    [0b011, 0b100, 0b010, 0b001, 0b110],
    [0b111, 0b010, 0b010, 0b010, 0b010],
    [0b101, 0b101, 0b101, 0b101, 0b111],
    [0b101, 0b101, 0b101, 0b101, 0b010],
    [0b101, 0b101, 0b111, 0b111, 0b101],
    [0b101, 0b101, 0b010, 0b101, 0b101],
    [0b101, 0b101, 0b010, 0b010, 0b010],
    [0b111, 0b001, 0b010, 0b100, 0b111],
];

/// Outline colour for a class id.
pub fn class_colour(class_id: u32) -> [u8; 3] {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// Label text drawn above each box: class name and confidence percent.
pub fn label_text(detection: &Detection) -> String {
    let pct = (detection.confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("{} {}%", detection.label(), pct)
}

/// Return a copy of `frame` with one outline and label per detection.
///
/// The input frame is never modified. Boxes reaching past the edges are
/// clamped; boxes entirely outside the frame are skipped.
pub fn annotate(frame: &Frame, detections: &DetectionSet) -> Result<Frame> {
    let mut canvas = frame.to_rgb_image();
    for detection in detections {
        let Some(rect) = detection.bbox.to_pixels(frame.width(), frame.height()) else {
            continue;
        };
        let colour = Rgb(class_colour(detection.class_id));
        draw_outline(&mut canvas, rect, colour);
        draw_label(&mut canvas, rect, &label_text(detection), colour);
    }
    frame.derive_from_image(canvas)
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, colour: Rgb<u8>) {
    let x1 = x1.min(canvas.width());
    let y1 = y1.min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, colour);
        }
    }
}

fn draw_outline(canvas: &mut RgbImage, (x0, y0, x1, y1): (u32, u32, u32, u32), colour: Rgb<u8>) {
    let t = OUTLINE_PX;
    fill_rect(canvas, x0, y0, x1 + 1, y0 + t, colour);
    fill_rect(canvas, x0, (y1 + 1).saturating_sub(t), x1 + 1, y1 + 1, colour);
    fill_rect(canvas, x0, y0, x0 + t, y1 + 1, colour);
    fill_rect(canvas, (x1 + 1).saturating_sub(t), y0, x1 + 1, y1 + 1, colour);
}

fn glyph(c: char) -> Option<&'static [u8; 5]> {
    match c {
        '0'..='9' => DIGITS.get(c as usize - '0' as usize),
        '%' => Some(&PERCENT),
        'a'..='z' => LETTERS.get(c as usize - 'a' as usize),
        'A'..='Z' => LETTERS.get(c as usize - 'A' as usize),
        _ => None,
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    (x0, y0, _, _): (u32, u32, u32, u32),
    text: &str,
    colour: Rgb<u8>,
) {
    let advance = (GLYPH_W + 1) * GLYPH_SCALE;
    let tab_w = text.chars().count() as u32 * advance + LABEL_PAD * 2;
    let tab_h = GLYPH_H * GLYPH_SCALE + LABEL_PAD * 2;
    // Above the box when there is room, otherwise just inside its top edge.
    let ty = if y0 >= tab_h { y0 - tab_h } else { y0 };
    let tx = x0.min(canvas.width().saturating_sub(tab_w));
    fill_rect(canvas, tx, ty, tx + tab_w, ty + tab_h, colour);

    let ink = Rgb([255, 255, 255]);
    let mut pen_x = tx + LABEL_PAD;
    let pen_y = ty + LABEL_PAD;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (0b100 >> col) == 0 {
                        continue;
                    }
                    let px = pen_x + col * GLYPH_SCALE;
                    let py = pen_y + row as u32 * GLYPH_SCALE;
                    fill_rect(canvas, px, py, px + GLYPH_SCALE, py + GLYPH_SCALE, ink);
                }
            }
        }
        pen_x += advance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, DetectionFilter};

    fn one_person() -> DetectionSet {
        DetectionSet::filtered(
            vec![Detection::new(0, 0.87, BoundingBox::new(0.25, 0.5, 0.5, 0.25))],
            &DetectionFilter::new([0], 0.5),
        )
    }

    #[test]
    fn input_frame_is_untouched() {
        let frame = Frame::filled(64, 48, [10, 20, 30]).unwrap();
        let annotated = annotate(&frame, &one_person()).unwrap();
        assert!(frame.pixels().chunks(3).all(|px| px == [10, 20, 30]));
        assert_eq!((annotated.width(), annotated.height()), (64, 48));
        assert_eq!(annotated.captured_at(), frame.captured_at());
        assert_eq!(annotated.pixel(16, 24), Some(class_colour(0)));
        assert_eq!(annotated.pixel(32, 30), Some([10, 20, 30]));
    }

    #[test]
    fn empty_set_is_a_plain_copy() {
        let frame = Frame::filled(8, 8, [1, 2, 3]).unwrap();
        let annotated = annotate(&frame, &DetectionSet::empty()).unwrap();
        assert_eq!(annotated.pixels(), frame.pixels());
    }

    #[test]
    fn boxes_past_the_edge_are_clamped() {
        let frame = Frame::filled(20, 20, [0, 0, 0]).unwrap();
        let set = DetectionSet::filtered(
            vec![
                Detection::new(3, 0.9, BoundingBox::new(0.8, 0.8, 0.9, 0.9)),
                Detection::new(3, 0.9, BoundingBox::new(2.0, 2.0, 0.1, 0.1)),
            ],
            &DetectionFilter::new([3], 0.5),
        );
        let annotated = annotate(&frame, &set).unwrap();
        assert_eq!(annotated.pixel(19, 19), Some(class_colour(3)));
    }

    #[test]
    fn label_text_names_the_class() {
        let d = Detection::new(2, 0.456, BoundingBox::new(0.0, 0.0, 0.1, 0.1));
        assert_eq!(label_text(&d), "car 46%");
        let d = Detection::new(0, 0.87, BoundingBox::new(0.0, 0.0, 0.1, 0.1));
        assert_eq!(label_text(&d), "person 87%");
    }

    #[test]
    fn every_label_character_has_a_glyph() {
        for c in ('a'..='z').chain('0'..='9').chain(['%']) {
            assert!(glyph(c).is_some(), "no glyph for {c:?}");
        }
        assert_eq!(glyph('P'), glyph('p'));
    }

    #[test]
    fn class_name_is_inked_above_the_box() {
        let frame = Frame::filled(200, 100, [0, 0, 0]).unwrap();
        let annotated = annotate(&frame, &one_person()).unwrap();
        // Box starts at (50, 50); the tab is 14px tall, text inset by 2px.
        // Top-left pixel of 'P' is set, its top-right one is not.
        assert_eq!(annotated.pixel(52, 38), Some([255, 255, 255]));
        assert_eq!(annotated.pixel(56, 38), Some(class_colour(0)));
    }
}
