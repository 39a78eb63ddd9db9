//! Error types for the grading pipeline

use thiserror::Error;

/// Errors surfaced by the grading pipeline and its data types.
///
/// Only [`GradeError::InvalidAnswerKey`] escapes [`crate::vision::GradingPipeline::grade`];
/// geometry and transform failures are folded into a degraded
/// [`crate::vision::GradeResult`] at the pipeline boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GradeError {
    /// The answer key is empty or malformed
    #[error("invalid answer key: {0}")]
    InvalidAnswerKey(String),

    /// A grid sample does not match the answer key's shape
    #[error("grid sample is {got_questions}x{got_choices}, expected {questions}x{choices}")]
    ShapeMismatch {
        questions: usize,
        choices: usize,
        got_questions: usize,
        got_choices: usize,
    },

    /// A located region collapsed to non-positive area
    #[error("degenerate region (area {area:.2})")]
    DegenerateRegion { area: f64 },

    /// The point correspondences do not define an invertible transform
    #[error("perspective transform is singular")]
    SingularTransform,

    /// Canonical output size has a zero dimension
    #[error("invalid canonical size {width}x{height}")]
    InvalidCanonicalSize { width: u32, height: u32 },
}
