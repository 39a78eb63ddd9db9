//! Vision Layer
//!
//! Turns a photo of an answer sheet into a graded, annotated result:
//! - Region localization (answer block and grade block)
//! - Perspective rectification to canonical sizes
//! - Bubble grid sampling
//! - Answer decoding and scoring
//!
//! Overlay rendering lives in [`crate::overlay`]; this module wires the
//! stages together in [`GradingPipeline`].

pub mod geometry;
pub mod grid;
pub mod homography;
pub mod locate;
pub mod rectify;
pub mod scoring;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::GradeError;
use crate::overlay::{OverlayRenderer, OverlayStyle};

pub use geometry::Region;
pub use grid::{Binarization, GridSample, GridSampler, SamplerConfig};
pub use homography::Homography;
pub use locate::{Candidate, LocatorConfig, RegionLocator};
pub use rectify::{rectify, RectifiedImage};
pub use scoring::{AnswerKey, Scorecard};

/// Canonical geometry of the printed sheet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLayout {
    /// Rectified answer block width
    pub answer_width: u32,
    /// Rectified answer block height
    pub answer_height: u32,
    /// Rectified grade block width
    pub grade_width: u32,
    /// Rectified grade block height
    pub grade_height: u32,
    /// Choices per question when building keys from a question bank
    pub choice_count: usize,
    /// Treat a missing grade block as "no sheet"
    pub require_grade_box: bool,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            answer_width: 600,
            answer_height: 400,
            grade_width: 325,
            grade_height: 150,
            choice_count: 4,
            require_grade_box: true,
        }
    }
}

/// How a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeStatus {
    /// Answers were decoded and scored
    Graded,
    /// No usable sheet was found; retry with a clearer frame
    NoSheetDetected,
    /// A located region collapsed to zero area; retry with a clearer frame
    GeometryDegenerate,
}

/// Result of grading one frame
#[derive(Debug, Clone)]
pub struct GradeResult {
    /// Whether the frame was graded or degraded
    pub status: GradeStatus,
    /// Percentage of correct answers in [0, 100]; 0 when not graded
    pub percentage_score: f64,
    /// Correctness per question, in question order; empty when not graded
    pub per_question_correctness: Vec<bool>,
    /// Decoded choice per question number (`None` = unanswered); empty when not graded
    pub detected_answers: BTreeMap<u32, Option<usize>>,
    /// Copy of the input frame with the overlay (or banner) drawn on it
    pub annotated_frame: RgbImage,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

impl GradeResult {
    pub fn is_graded(&self) -> bool {
        self.status == GradeStatus::Graded
    }

    pub fn correct_count(&self) -> usize {
        self.per_question_correctness.iter().filter(|&&ok| ok).count()
    }

    fn degraded(status: GradeStatus, annotated_frame: RgbImage, start: Instant) -> Self {
        Self {
            status,
            percentage_score: 0.0,
            per_question_correctness: vec![],
            detected_answers: BTreeMap::new(),
            annotated_frame,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Settings for every pipeline stage
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub locator: LocatorConfig,
    pub sheet: SheetLayout,
    pub sampler: SamplerConfig,
    pub style: OverlayStyle,
}

impl PipelineConfig {
    /// Pipeline settings from application config, loading the overlay font
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            locator: config.locator.clone(),
            sheet: config.sheet.clone(),
            sampler: config.sampler.clone(),
            style: OverlayStyle::from_settings(&config.overlay),
        }
    }
}

/// Stateless grading pipeline.
///
/// Each call consumes one frame and returns one result; nothing is carried
/// between calls, so a single pipeline can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct GradingPipeline {
    locator: RegionLocator,
    sampler: GridSampler,
    renderer: OverlayRenderer,
    sheet: SheetLayout,
}

impl GradingPipeline {
    /// Create a pipeline with default settings and the bundled overlay font
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline with custom configuration
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            locator: RegionLocator::new(config.locator),
            sampler: GridSampler::new(config.sampler),
            renderer: OverlayRenderer::new(config.style),
            sheet: config.sheet,
        }
    }

    pub fn sheet(&self) -> &SheetLayout {
        &self.sheet
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    /// Locate, rectify, sample, score and annotate one frame.
    ///
    /// Only an empty answer key is an error. Frames without a usable sheet
    /// come back with a degraded status and a banner-annotated copy.
    pub fn grade(&self, frame: &RgbImage, key: &AnswerKey) -> Result<GradeResult, GradeError> {
        key.ensure_gradable()?;
        let start = Instant::now();

        let regions: Vec<Region> = self
            .locator
            .locate(frame)
            .into_iter()
            .map(|candidate| candidate.region)
            .collect();

        Ok(self.grade_located(frame, &regions, key, start))
    }

    /// Grade using regions found elsewhere, largest (answer block) first
    pub fn grade_regions(&self, frame: &RgbImage, regions: &[Region], key: &AnswerKey) -> Result<GradeResult, GradeError> {
        key.ensure_gradable()?;
        Ok(self.grade_located(frame, regions, key, Instant::now()))
    }

    fn grade_located(&self, frame: &RgbImage, regions: &[Region], key: &AnswerKey, start: Instant) -> GradeResult {
        let Some(answer_region) = regions.first().map(Region::reordered) else {
            info!("No OMR sheet detected");
            return self.degrade(GradeStatus::NoSheetDetected, frame, start);
        };

        let grade_region = regions.get(1).map(Region::reordered);
        if grade_region.is_none() && self.sheet.require_grade_box {
            info!("Answer block found but no grade block; treating as no sheet");
            return self.degrade(GradeStatus::NoSheetDetected, frame, start);
        }

        let degenerate = std::iter::once(&answer_region)
            .chain(grade_region.as_ref())
            .any(|r| r.is_degenerate(0.0));
        if degenerate {
            warn!("Located region has no area");
            return self.degrade(GradeStatus::GeometryDegenerate, frame, start);
        }

        match self.process(frame, &answer_region, grade_region.as_ref(), key) {
            Ok((card, annotated_frame)) => {
                let elapsed = start.elapsed();
                debug!(
                    "Graded frame in {:?}: {}/{} correct ({:.1}%)",
                    elapsed,
                    card.correct_count(),
                    card.question_count(),
                    card.percentage
                );
                GradeResult {
                    status: GradeStatus::Graded,
                    percentage_score: card.percentage,
                    per_question_correctness: card.correctness,
                    detected_answers: card.detected,
                    annotated_frame,
                    processing_time_ms: elapsed.as_millis() as u64,
                }
            }
            Err(GradeError::DegenerateRegion { area }) => {
                warn!("Region collapsed during rectification (area {:.2})", area);
                self.degrade(GradeStatus::GeometryDegenerate, frame, start)
            }
            Err(e) => {
                warn!("Grading failed, reporting no sheet: {}", e);
                self.degrade(GradeStatus::NoSheetDetected, frame, start)
            }
        }
    }

    fn process(
        &self,
        frame: &RgbImage,
        answer_region: &Region,
        grade_region: Option<&Region>,
        key: &AnswerKey,
    ) -> Result<(Scorecard, RgbImage), GradeError> {
        let answer_block = rectify(frame, answer_region, self.sheet.answer_width, self.sheet.answer_height)?;
        let grade_block = grade_region
            .map(|r| rectify(frame, r, self.sheet.grade_width, self.sheet.grade_height))
            .transpose()?;

        let sample = self
            .sampler
            .sample(&answer_block.image, key.question_count(), key.choice_count());
        let min_fill = self.sampler.min_fill(&sample);
        let card = scoring::grade_sample(&sample, key, min_fill)?;

        let annotated = self
            .renderer
            .annotate(frame, &answer_block, grade_block.as_ref(), key, &card)?;

        Ok((card, annotated))
    }

    fn degrade(&self, status: GradeStatus, frame: &RgbImage, start: Instant) -> GradeResult {
        GradeResult::degraded(status, self.renderer.render_no_sheet(frame), start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn abcd_key() -> AnswerKey {
        AnswerKey::from_ordered(&[0, 1, 2, 3], 4).unwrap()
    }

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    #[test]
    fn test_pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GradingPipeline>();
    }

    #[test]
    fn test_empty_key_is_rejected_before_processing() {
        let pipeline = GradingPipeline::new();
        let key = AnswerKey::from_ordered(&[], 4).unwrap();
        let result = pipeline.grade(&RgbImage::new(0, 0), &key);
        assert!(matches!(result, Err(GradeError::InvalidAnswerKey(_))));
    }

    #[test]
    fn test_blank_frame_degrades_to_no_sheet() {
        let pipeline = GradingPipeline::new();
        let frame = blank(600, 400);
        let result = pipeline.grade(&frame, &abcd_key()).unwrap();

        assert_eq!(result.status, GradeStatus::NoSheetDetected);
        assert!(result.detected_answers.is_empty());
        assert!(result.per_question_correctness.is_empty());
        assert_eq!(result.percentage_score, 0.0);
        assert_eq!(result.annotated_frame, pipeline.renderer().render_no_sheet(&frame));
    }

    #[test]
    fn test_collinear_region_degrades_like_no_sheet() {
        let pipeline = GradingPipeline::new();
        let frame = blank(600, 400);
        let collinear = Region::new([(10.0, 10.0), (100.0, 100.0), (200.0, 200.0), (300.0, 300.0)]);
        let grade_box = Region::new([(400.0, 20.0), (550.0, 20.0), (400.0, 90.0), (550.0, 90.0)]);

        let degraded = pipeline
            .grade_regions(&frame, &[collinear, grade_box], &abcd_key())
            .unwrap();
        let no_sheet = pipeline.grade(&frame, &abcd_key()).unwrap();

        assert_eq!(degraded.status, GradeStatus::GeometryDegenerate);
        assert!(degraded.detected_answers.is_empty());
        assert_eq!(degraded.annotated_frame, no_sheet.annotated_frame);
    }

    #[test]
    fn test_missing_grade_box_policy() {
        let frame = blank(600, 400);
        let answer = Region::new([(50.0, 50.0), (450.0, 50.0), (50.0, 350.0), (450.0, 350.0)]);

        let strict = GradingPipeline::new();
        let result = strict.grade_regions(&frame, &[answer], &abcd_key()).unwrap();
        assert_eq!(result.status, GradeStatus::NoSheetDetected);

        let lenient = GradingPipeline::with_config(PipelineConfig {
            sheet: SheetLayout {
                require_grade_box: false,
                ..Default::default()
            },
            ..Default::default()
        });
        let result = lenient.grade_regions(&frame, &[answer], &abcd_key()).unwrap();
        assert_eq!(result.status, GradeStatus::Graded);
        // blank sheet: every row unanswered
        assert_eq!(result.detected_answers.len(), 4);
        assert!(result.detected_answers.values().all(|a| a.is_none()));
        assert_eq!(result.percentage_score, 0.0);
    }
}
