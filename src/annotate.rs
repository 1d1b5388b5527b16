use crate::detection::Detection;
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const BOX_THICKNESS: i32 = 3;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;

const COMPLIANT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws detection boxes and labels onto an image. Violation classes (label
/// prefixed with `NO-`) are drawn red, everything else green.
pub struct Annotator {
    font: FontArc,
    font_scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    pub fn new() -> Self {
        let font_data = include_bytes!("../assets/DejaVuSans.ttf");
        let font = FontArc::try_from_slice(font_data).expect("failed to load embedded font");

        Self {
            font,
            font_scale: PxScale::from(LABEL_FONT_SIZE),
        }
    }

    pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            self.draw_detection(image, detection);
        }
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let color = if detection.is_violation() {
            VIOLATION_COLOR
        } else {
            COMPLIANT_COLOR
        };

        let (w, h) = (image.width() as i32, image.height() as i32);
        let [x1, y1, x2, y2] = detection.bbox;

        let x_min = x1.clamp(0, w - 1);
        let y_min = y1.clamp(0, h - 1);
        let x_max = x2.clamp(0, w - 1);
        let y_max = y2.clamp(0, h - 1);

        if x_min >= x_max || y_min >= y_max {
            return;
        }

        for inset in 0..BOX_THICKNESS {
            let width = (x_max - x_min - 2 * inset).max(0) as u32;
            let height = (y_max - y_min - 2 * inset).max(0) as u32;
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at(x_min + inset, y_min + inset).of_size(width, height);
            draw_hollow_rect_mut(image, rect, color);
        }

        self.draw_label(image, detection, color, x_min, y_min);
    }

    fn draw_label(
        &self,
        image: &mut RgbImage,
        detection: &Detection,
        color: Rgb<u8>,
        x_min: i32,
        y_min: i32,
    ) {
        let label = format!("{} {:.2}", detection.class, detection.confidence);

        let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
        let label_x = x_min.max(0);
        let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);

        let max_width = (image.width() as i32 - label_x).max(0);
        let label_width = text_width.min(max_width) as u32;
        let label_height = LABEL_TEXT_HEIGHT as u32;

        if label_width == 0 || label_height == 0 {
            return;
        }

        let background = Rect::at(label_x, label_y).of_size(label_width, label_height);
        draw_filled_rect_mut(image, background, color);

        draw_text_mut(
            image,
            TEXT_COLOR,
            label_x,
            label_y + LABEL_TEXT_VERTICAL_PADDING,
            self.font_scale,
            &self.font,
            &label,
        );
    }
}
