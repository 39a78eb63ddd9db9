//! Overlay Presentation Layer
//!
//! Draws grading results in canonical sheet space, warps them back into the
//! photo through the inverse of the rectifying transform, and adds them onto
//! a copy of the photo.

pub mod style;

use ab_glyph::{Font, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use tracing::debug;

use crate::error::GradeError;
use crate::vision::grid::cell_span;
use crate::vision::rectify::RectifiedImage;
use crate::vision::scoring::{AnswerKey, Scorecard};

pub use style::OverlayStyle;

/// Top-left offset of the "no sheet" banner
const BANNER_MARGIN: i32 = 10;
const BANNER_PADDING: i32 = 6;
/// Banner size when no font is available
const BANNER_FALLBACK_SIZE: (u32, u32) = (360, 36);
const BANNER_TEXT_SCALE: f32 = 28.0;

/// Renders graded overlays onto frames
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw answer markers and grid lines on a black canonical-size canvas
    pub fn render_answers(&self, width: u32, height: u32, key: &AnswerKey, card: &Scorecard) -> RgbImage {
        let mut canvas = RgbImage::new(width, height);
        let questions = key.question_count();
        let choices = key.choice_count();
        if questions == 0 || choices == 0 || width == 0 || height == 0 {
            return canvas;
        }

        draw_grid(&mut canvas, questions, choices, self.style.grid);

        let cell_w = width as f32 / choices as f32;
        let cell_h = height as f32 / questions as f32;
        let big = ((cell_w.min(cell_h) * 0.4) as i32).max(1);
        let small = ((cell_w.min(cell_h) * 0.15) as i32).max(1);

        let center = |q: usize, c: usize| -> (i32, i32) {
            let (x0, x1) = cell_span(c, width, choices);
            let (y0, y1) = cell_span(q, height, questions);
            (((x0 + x1) / 2) as i32, ((y0 + y1) / 2) as i32)
        };

        for (row, (q_no, correct)) in key.iter().enumerate() {
            let detected = card.detected.get(&q_no).copied().flatten();
            let is_correct = card.correctness.get(row).copied().unwrap_or(false);

            match detected {
                Some(choice) if is_correct => {
                    draw_filled_circle_mut(&mut canvas, center(row, choice), big, self.style.correct);
                }
                Some(choice) => {
                    draw_filled_circle_mut(&mut canvas, center(row, choice), big, self.style.incorrect);
                    draw_filled_circle_mut(&mut canvas, center(row, correct), small, self.style.expected);
                }
                None => {
                    draw_filled_circle_mut(&mut canvas, center(row, correct), small, self.style.expected);
                }
            }
        }

        canvas
    }

    /// Draw the score on a black canvas sized like the grade block
    pub fn render_score(&self, width: u32, height: u32, percentage: f64) -> RgbImage {
        let mut canvas = RgbImage::new(width, height);
        if width == 0 || height == 0 {
            return canvas;
        }

        match &self.style.font {
            Some(font) => {
                let text = format!("{}%", percentage.clamp(0.0, 100.0) as u32);
                let scale = PxScale::from(height as f32 * 0.6);
                let (tw, th) = text_size(scale, font, &text);
                // Glyphs hang from the ascent line; center their visible box
                let ascent = font.as_scaled(scale).ascent();
                let x = (width as i32 - tw as i32) / 2;
                let y = ((height as f32 - th as f32) / 2.0 - (ascent - th as f32)).round() as i32;
                draw_text_mut(&mut canvas, self.style.score, x, y, scale, font, &text);
            }
            None => {
                // Proportional bar inside an outline
                let margin = (width.min(height) / 10).max(1);
                let track_w = width.saturating_sub(2 * margin);
                let track_h = (height / 3).max(1);
                let top = ((height - track_h) / 2) as i32;
                if track_w > 0 {
                    let outline = Rect::at(margin as i32, top).of_size(track_w, track_h);
                    draw_hollow_rect_mut(&mut canvas, outline, self.style.score);
                    let filled = (track_w as f64 * percentage.clamp(0.0, 100.0) / 100.0).round() as u32;
                    if filled > 0 {
                        let bar = Rect::at(margin as i32, top).of_size(filled, track_h);
                        draw_filled_rect_mut(&mut canvas, bar, self.style.score);
                    }
                }
            }
        }

        canvas
    }

    /// Area the "no sheet" banner occupies on a frame of the given size
    pub fn banner_rect(&self, frame_width: u32, frame_height: u32) -> Option<Rect> {
        let (want_w, want_h) = match &self.style.font {
            Some(font) => {
                let scale = PxScale::from(BANNER_TEXT_SCALE);
                let (tw, _) = text_size(scale, font, &self.style.banner_text);
                // Full line height, so ascenders and descenders stay on the banner
                let line_h = font.as_scaled(scale).height().ceil() as u32;
                (tw + 2 * BANNER_PADDING as u32, line_h + 2 * BANNER_PADDING as u32)
            }
            None => BANNER_FALLBACK_SIZE,
        };

        let avail_w = frame_width.saturating_sub(BANNER_MARGIN as u32);
        let avail_h = frame_height.saturating_sub(BANNER_MARGIN as u32);
        let w = want_w.min(avail_w);
        let h = want_h.min(avail_h);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::at(BANNER_MARGIN, BANNER_MARGIN).of_size(w, h))
    }

    /// Copy of `frame` with the "no sheet detected" banner drawn on it
    pub fn render_no_sheet(&self, frame: &RgbImage) -> RgbImage {
        let mut annotated = frame.clone();
        let Some(rect) = self.banner_rect(frame.width(), frame.height()) else {
            return annotated;
        };

        draw_filled_rect_mut(&mut annotated, rect, self.style.banner);
        if let Some(font) = &self.style.font {
            draw_text_mut(
                &mut annotated,
                Rgb([255, 255, 255]),
                rect.left() + BANNER_PADDING,
                rect.top() + BANNER_PADDING,
                PxScale::from(BANNER_TEXT_SCALE),
                font,
                &self.style.banner_text,
            );
        }
        annotated
    }

    /// Full overlay: answer markers over the answer block, score over the grade block
    pub fn annotate(
        &self,
        frame: &RgbImage,
        answer_block: &RectifiedImage,
        grade_block: Option<&RectifiedImage>,
        key: &AnswerKey,
        card: &Scorecard,
    ) -> Result<RgbImage, GradeError> {
        let (fw, fh) = frame.dimensions();
        let mut layers = Vec::with_capacity(2);

        let answers = self.render_answers(answer_block.width(), answer_block.height(), key, card);
        layers.push(answer_block.unwarp(&answers, fw, fh)?);

        if let Some(grade_block) = grade_block {
            let score = self.render_score(grade_block.width(), grade_block.height(), card.percentage);
            layers.push(grade_block.unwarp(&score, fw, fh)?);
        }

        debug!("Compositing {} overlay layers onto {}x{} frame", layers.len(), fw, fh);
        Ok(composite(frame, &layers))
    }
}

/// Grid lines separating every question row and choice column
fn draw_grid(canvas: &mut RgbImage, questions: usize, choices: usize, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    let (right, bottom) = ((width - 1) as f32, (height - 1) as f32);

    for q in 0..=questions {
        let y = if q == questions { bottom } else { cell_span(q, height, questions).0 as f32 };
        draw_line_segment_mut(canvas, (0.0, y), (right, y), color);
    }
    for c in 0..=choices {
        let x = if c == choices { right } else { cell_span(c, width, choices).0 as f32 };
        draw_line_segment_mut(canvas, (x, 0.0), (x, bottom), color);
    }
}

/// Saturating per-channel sum of `frame` and each layer
pub fn composite(frame: &RgbImage, layers: &[RgbImage]) -> RgbImage {
    let mut out = frame.clone();
    for layer in layers {
        if layer.dimensions() != out.dimensions() {
            continue;
        }
        for (dst, src) in out.pixels_mut().zip(layer.pixels()) {
            for ch in 0..3 {
                dst.0[ch] = dst.0[ch].saturating_add(src.0[ch]);
            }
        }
    }
    out
}
