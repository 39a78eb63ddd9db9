//! Bubble grid sampling
//!
//! Splits a rectified answer block into a question x choice grid and counts
//! the dark pixels in each cell.

use image::{imageops, GrayImage, RgbImage};
use imageproc::contrast::otsu_level;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GradeError;

/// How gray pixels are classified as marked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Binarization {
    /// Pixels at or below `level` are marks
    Fixed { level: u8 },
    /// Level chosen per image by Otsu's method
    Otsu,
}

impl Default for Binarization {
    fn default() -> Self {
        Binarization::Fixed { level: 170 }
    }
}

impl Binarization {
    /// Resolve the mark level for a particular image
    pub fn level_for(&self, gray: &GrayImage) -> u8 {
        match *self {
            Binarization::Fixed { level } => level,
            Binarization::Otsu => otsu_level(gray),
        }
    }
}

/// Configuration for grid sampling and answer decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Fraction of a sampled cell's pixels that must be dark before a row counts as answered
    pub min_fill_ratio: f32,
    /// Fraction of each cell's width and height skipped on every side, so
    /// printed frame and grid lines are not counted as marks
    pub cell_margin: f32,
    /// Mark classification policy
    pub binarization: Binarization,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_fill_ratio: 0.08,
            cell_margin: 0.15,
            binarization: Binarization::default(),
        }
    }
}

/// Per-cell dark-pixel counts, one row per question and one column per choice
#[derive(Debug, Clone, PartialEq)]
pub struct GridSample {
    cells: Array2<u32>,
    cell_area: u32,
}

impl GridSample {
    /// Wrap an existing matrix of intensities
    pub fn new(cells: Array2<u32>) -> Self {
        Self { cells, cell_area: 0 }
    }

    /// Build from row-major values
    pub fn from_shape_vec(questions: usize, choices: usize, values: Vec<u32>) -> Result<Self, GradeError> {
        let got = values.len();
        let cells = Array2::from_shape_vec((questions, choices), values).map_err(|_| GradeError::ShapeMismatch {
            questions,
            choices,
            got_questions: if choices == 0 { 0 } else { got / choices },
            got_choices: choices,
        })?;
        Ok(Self::new(cells))
    }

    pub fn questions(&self) -> usize {
        self.cells.nrows()
    }

    pub fn choices(&self) -> usize {
        self.cells.ncols()
    }

    /// Pixels counted in the smallest cell, 0 when unknown
    pub fn cell_area(&self) -> u32 {
        self.cell_area
    }

    pub fn get(&self, question: usize, choice: usize) -> u32 {
        self.cells[[question, choice]]
    }

    /// Intensities for one question (0-based row)
    pub fn row(&self, question: usize) -> ArrayView1<'_, u32> {
        self.cells.row(question)
    }

    pub fn cells(&self) -> &Array2<u32> {
        &self.cells
    }
}

/// Samples fill intensity over an N x C grid
#[derive(Debug, Clone, Default)]
pub struct GridSampler {
    config: SamplerConfig,
}

impl GridSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Count dark pixels per cell of `answer_block`
    pub fn sample(&self, answer_block: &RgbImage, questions: usize, choices: usize) -> GridSample {
        let gray = imageops::grayscale(answer_block);
        self.sample_gray(&gray, questions, choices)
    }

    /// Count dark pixels per cell of an already-grayscale block
    pub fn sample_gray(&self, gray: &GrayImage, questions: usize, choices: usize) -> GridSample {
        let (width, height) = gray.dimensions();
        let mut cells = Array2::<u32>::zeros((questions, choices));
        if questions == 0 || choices == 0 || width == 0 || height == 0 {
            return GridSample { cells, cell_area: 0 };
        }

        let level = self.config.binarization.level_for(gray);
        let columns = inset_spans(width, choices, self.config.cell_margin);
        let rows = inset_spans(height, questions, self.config.cell_margin);

        for (q, &(y0, y1)) in rows.iter().enumerate() {
            for y in y0..y1 {
                for (c, &(x0, x1)) in columns.iter().enumerate() {
                    let dark = (x0..x1).filter(|&x| gray.get_pixel(x, y).0[0] <= level).count();
                    cells[[q, c]] += dark as u32;
                }
            }
        }

        let cell_area = shortest(&columns) * shortest(&rows);

        debug!(
            "Sampled {}x{} grid at level {} (cell area {})",
            questions, choices, level, cell_area
        );

        GridSample { cells, cell_area }
    }

    /// Minimum count a row's maximum must exceed to count as answered
    pub fn min_fill(&self, sample: &GridSample) -> u32 {
        (self.config.min_fill_ratio.max(0.0) * sample.cell_area() as f32).floor() as u32
    }
}

/// Band spans shrunk by `margin` of their length on both ends
fn inset_spans(extent: u32, count: usize, margin: f32) -> Vec<(u32, u32)> {
    let margin = margin.clamp(0.0, 0.45);
    (0..count)
        .map(|i| {
            let (start, end) = cell_span(i, extent, count);
            let inset = ((end - start) as f32 * margin).floor() as u32;
            (start + inset, end - inset)
        })
        .collect()
}

fn shortest(spans: &[(u32, u32)]) -> u32 {
    spans.iter().map(|&(start, end)| end - start).min().unwrap_or(0).max(1)
}

/// Pixel span `[start, end)` of band `index` out of `count`
pub fn cell_span(index: usize, extent: u32, count: usize) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / count as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / count as u64) as u32;
    (start, end)
}
