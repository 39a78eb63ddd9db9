//! omr-grader - Multiple-choice answer sheet grading from photos
//!
//! Locates the answer block and grade block in a photo, rectifies them,
//! reads the filled bubbles, scores them against an answer key and draws
//! the result back onto the photo. Blank sheets for a question bank are
//! rendered by [`sheet`].

pub mod capture;
pub mod config;
pub mod error;
pub mod overlay;
pub mod session;
pub mod sheet;
pub mod storage;
pub mod vision;

pub use error::GradeError;
pub use vision::{AnswerKey, GradeResult, GradeStatus, GradingPipeline, PipelineConfig, Region};
