//! Printable answer sheets
//!
//! Renders a blank sheet for a question bank in the shape the grader looks
//! for: a framed bubble grid with one row per question, and a smaller framed
//! grade box above it. The printed layout comes back with the images so a
//! scanned copy can be graded in printed order.

use ab_glyph::{FontArc, PxScale};
use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::overlay::style::bundled_font;
use crate::storage::question_bank::{choice_letter, save_layout, LayoutEntry, Question};

const PAPER: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);

const LABEL_SCALE: f32 = 22.0;
const PAPER_TEXT_SCALE: f32 = 20.0;
const PAPER_LINE: u32 = 30;

/// Page geometry of a generated sheet, in pixels
#[derive(Debug, Clone)]
pub struct SheetTemplate {
    pub page_width: u32,
    pub page_height: u32,
    /// Blank border kept around the page content
    pub margin: u32,
    pub block_left: u32,
    pub block_top: u32,
    pub block_width: u32,
    pub grade_left: u32,
    pub grade_top: u32,
    pub grade_width: u32,
    pub grade_height: u32,
    /// Line width of both frames
    pub frame_thickness: u32,
    pub max_row_height: u32,
    pub min_row_height: u32,
    /// Bubble radius as a fraction of the shorter cell side
    pub bubble_ratio: f32,
    pub choice_count: usize,
}

impl Default for SheetTemplate {
    fn default() -> Self {
        Self {
            page_width: 800,
            page_height: 1100,
            margin: 40,
            block_left: 100,
            block_top: 200,
            block_width: 660,
            grade_left: 520,
            grade_top: 20,
            grade_width: 240,
            grade_height: 100,
            frame_thickness: 3,
            max_row_height: 80,
            min_row_height: 24,
            bubble_ratio: 0.3,
            choice_count: 4,
        }
    }
}

impl SheetTemplate {
    /// Template for sheets with `choice_count` bubbles per row
    pub fn with_choices(choice_count: usize) -> Self {
        Self {
            choice_count,
            ..Default::default()
        }
    }

    fn rows_height(&self) -> u32 {
        self.page_height.saturating_sub(self.block_top + self.margin)
    }

    /// Most questions that fit on one page
    pub fn capacity(&self) -> usize {
        (self.rows_height() / self.min_row_height.max(1)) as usize
    }

    fn row_height(&self, rows: usize) -> u32 {
        (self.rows_height() / rows.max(1) as u32).min(self.max_row_height)
    }
}

/// A rendered sheet and the layout needed to grade it
#[derive(Debug, Clone)]
pub struct GeneratedSheet {
    /// The page students fill in
    pub answer_sheet: RgbImage,
    /// Question texts and options in printed order
    pub question_paper: RgbImage,
    pub layout: Vec<LayoutEntry>,
}

impl GeneratedSheet {
    /// Printed row -> question number in the bank
    pub fn printed_order(&self) -> BTreeMap<u32, u32> {
        self.layout
            .iter()
            .map(|entry| (entry.printed_index, entry.original_q_no))
            .collect()
    }

    /// Write `answer_sheet.png`, `questions.png`, `layout.json` and
    /// `printed_order.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let sheet_path = dir.join("answer_sheet.png");
        self.answer_sheet
            .save(&sheet_path)
            .with_context(|| format!("Failed to write {}", sheet_path.display()))?;

        let paper_path = dir.join("questions.png");
        self.question_paper
            .save(&paper_path)
            .with_context(|| format!("Failed to write {}", paper_path.display()))?;

        save_layout(&self.layout, &dir.join("layout.json"))?;

        let order_path = dir.join("printed_order.json");
        let order = serde_json::to_string_pretty(&self.printed_order())?;
        std::fs::write(&order_path, order).with_context(|| format!("Failed to write {}", order_path.display()))?;

        info!("Sheet with {} questions written to {}", self.layout.len(), dir.display());
        Ok(())
    }
}

/// Render the answer sheet and question paper for `questions`, in bank order
pub fn generate_sheet(questions: &[Question], template: &SheetTemplate) -> Result<GeneratedSheet> {
    if questions.is_empty() {
        bail!("No questions to print");
    }
    if template.choice_count == 0 {
        bail!("A sheet needs at least one choice per question");
    }
    let capacity = template.capacity();
    if questions.len() > capacity {
        bail!(
            "{} questions do not fit on one sheet (at most {})",
            questions.len(),
            capacity
        );
    }

    let font = bundled_font();
    let choices = template.choice_count;
    let row_h = template.row_height(questions.len());
    let cell_w = template.block_width as f32 / choices as f32;
    let radius = (cell_w.min(row_h as f32) * template.bubble_ratio).round().max(2.0) as i32;

    let mut page = RgbImage::from_pixel(template.page_width, template.page_height, PAPER);

    let grade_box = Rect::at(template.grade_left as i32, template.grade_top as i32)
        .of_size(template.grade_width, template.grade_height);
    let block = Rect::at(template.block_left as i32, template.block_top as i32)
        .of_size(template.block_width, row_h * questions.len() as u32);
    draw_frame(&mut page, grade_box, template.frame_thickness);
    draw_frame(&mut page, block, template.frame_thickness);

    let column_center = |choice: usize| template.block_left as f32 + (choice as f32 + 0.5) * cell_w;
    let margin = template.margin as i32;

    if let Some(font) = &font {
        put_text(&mut page, font, LABEL_SCALE, margin, margin, "Student ID: ____________");
        put_text(&mut page, font, LABEL_SCALE, grade_box.left() - 100, grade_box.top() + 35, "Score:");
        for choice in 0..choices {
            let x = column_center(choice).round() as i32 - 7;
            put_text(&mut page, font, LABEL_SCALE, x, block.top() - 50, &choice_letter(Some(choice)));
        }
    }

    let mut layout = Vec::with_capacity(questions.len());
    for (row, question) in questions.iter().enumerate() {
        let printed_index = row as u32 + 1;
        let cy = (template.block_top as f32 + (row as f32 + 0.5) * row_h as f32).round() as i32;

        let mut options = BTreeMap::new();
        for choice in 0..choices {
            let center = (column_center(choice).round() as i32, cy);
            draw_hollow_circle_mut(&mut page, center, radius, INK);
            let side = 2 * radius as u32;
            let rect = [(center.0 - radius) as u32, (center.1 - radius) as u32, side, side];
            options.insert(choice_letter(Some(choice)), rect);
        }

        if let Some(font) = &font {
            let label = printed_index.to_string();
            put_text(&mut page, font, LABEL_SCALE, margin, cy - LABEL_SCALE as i32 / 2, &label);
        }

        layout.push(LayoutEntry {
            printed_index,
            original_q_no: question.q_no,
            options,
        });
    }

    let question_paper = render_question_paper(questions, template.page_width, font.as_ref());

    debug!(
        "Rendered {} rows of {} bubbles (row height {}, radius {})",
        questions.len(),
        choices,
        row_h,
        radius
    );

    Ok(GeneratedSheet {
        answer_sheet: page,
        question_paper,
        layout,
    })
}

/// One line per question text and one per option row
fn render_question_paper(questions: &[Question], width: u32, font: Option<&FontArc>) -> RgbImage {
    let height = 2 * PAPER_LINE + questions.len() as u32 * (2 * PAPER_LINE + 10) + PAPER_LINE;
    let mut paper = RgbImage::from_pixel(width, height, PAPER);
    let Some(font) = font else {
        return paper;
    };

    let left = PAPER_LINE as i32;
    let mut y = PAPER_LINE as i32;
    put_text(&mut paper, font, PAPER_TEXT_SCALE + 4.0, left, y, "Questions");
    y += PAPER_LINE as i32 + 10;

    for (row, question) in questions.iter().enumerate() {
        put_text(&mut paper, font, PAPER_TEXT_SCALE, left, y, &format!("{}. {}", row + 1, question.text));
        y += PAPER_LINE as i32;

        let column = (width as i32 - 2 * left) / question.choices.len().max(1) as i32;
        for (i, (letter, text)) in question.choices.iter().enumerate() {
            let x = left + 20 + i as i32 * column;
            put_text(&mut paper, font, PAPER_TEXT_SCALE, x, y, &format!("{}) {}", letter, text));
        }
        y += PAPER_LINE as i32 + 10;
    }
    paper
}

fn draw_frame(page: &mut RgbImage, rect: Rect, thickness: u32) {
    for k in 0..thickness.min(rect.width() / 2).min(rect.height() / 2) {
        let inner = Rect::at(rect.left() + k as i32, rect.top() + k as i32)
            .of_size(rect.width() - 2 * k, rect.height() - 2 * k);
        draw_hollow_rect_mut(page, inner, INK);
    }
}

fn put_text(page: &mut RgbImage, font: &FontArc, scale: f32, x: i32, y: i32, text: &str) {
    draw_text_mut(page, INK, x, y, PxScale::from(scale), font, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::question_bank::load_layout;
    use tempfile::TempDir;

    fn bank(count: u32) -> Vec<Question> {
        (1..=count)
            .map(|q_no| Question {
                q_no,
                text: format!("What is {} + {}?", q_no, q_no),
                choices: ["A", "B", "C", "D"]
                    .iter()
                    .enumerate()
                    .map(|(i, l)| (l.to_string(), (2 * q_no as usize + i).to_string()))
                    .collect(),
                answer: "A".to_string(),
            })
            .collect()
    }

    fn is_ink(page: &RgbImage, x: u32, y: u32) -> bool {
        page.get_pixel(x, y).0[0] < 128
    }

    #[test]
    fn test_empty_bank_is_rejected() {
        assert!(generate_sheet(&[], &SheetTemplate::default()).is_err());
        assert!(generate_sheet(&bank(2), &SheetTemplate::with_choices(0)).is_err());
    }

    #[test]
    fn test_too_many_questions_for_one_page() {
        let template = SheetTemplate::default();
        let capacity = template.capacity();
        assert!(capacity >= 30);
        assert!(generate_sheet(&bank(capacity as u32), &template).is_ok());
        assert!(generate_sheet(&bank(capacity as u32 + 1), &template).is_err());
    }

    #[test]
    fn test_layout_matches_drawn_bubbles() {
        let template = SheetTemplate::default();
        let sheet = generate_sheet(&bank(3), &template).unwrap();
        let page = &sheet.answer_sheet;

        assert_eq!(page.dimensions(), (800, 1100));
        assert_eq!(sheet.layout.len(), 3);

        for (row, entry) in sheet.layout.iter().enumerate() {
            assert_eq!(entry.printed_index, row as u32 + 1);
            assert_eq!(entry.original_q_no, row as u32 + 1);
            assert_eq!(entry.options.keys().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);

            let ys: Vec<u32> = entry.options.values().map(|r| r[1]).collect();
            assert!(ys.windows(2).all(|w| w[0] == w[1]), "row {} is not level", row);

            for &[x, y, w, h] in entry.options.values() {
                // Ring on the left edge, blank middle
                assert!(is_ink(page, x, y + h / 2), "no ring at ({}, {})", x, y + h / 2);
                assert!(!is_ink(page, x + w / 2, y + h / 2));
                // Inside the answer block frame
                assert!(x > template.block_left && x + w < template.block_left + template.block_width);
            }
        }

        // Both frames are printed
        assert!(is_ink(page, template.block_left + 1, template.block_top + 40));
        assert!(is_ink(page, template.grade_left + 1, template.grade_top + 50));
    }

    #[test]
    fn test_question_paper_lists_every_question() {
        let sheet = generate_sheet(&bank(5), &SheetTemplate::default()).unwrap();
        let paper = &sheet.question_paper;
        assert_eq!(paper.width(), 800);

        // Ink on the line of the last question
        let last_line = 2 * PAPER_LINE + 10 + 4 * (2 * PAPER_LINE + 10);
        let inked = (0..paper.width()).any(|x| (last_line..last_line + PAPER_LINE).any(|y| is_ink(paper, x, y)));
        assert!(inked);
    }

    #[test]
    fn test_save_writes_layout_and_order() {
        let dir = TempDir::new().unwrap();
        let mut questions = bank(2);
        questions[0].q_no = 7;

        let sheet = generate_sheet(&questions, &SheetTemplate::default()).unwrap();
        sheet.save(dir.path()).unwrap();

        assert!(dir.path().join("answer_sheet.png").exists());
        assert!(dir.path().join("questions.png").exists());
        assert_eq!(load_layout(&dir.path().join("layout.json")).unwrap(), sheet.layout);

        let order = std::fs::read_to_string(dir.path().join("printed_order.json")).unwrap();
        let order: BTreeMap<String, u32> = serde_json::from_str(&order).unwrap();
        assert_eq!(order["1"], 7);
        assert_eq!(order["2"], 2);
    }
}
