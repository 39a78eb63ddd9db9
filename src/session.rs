//! Scan Session
//!
//! Feeds frames from a [`FrameSource`] through the grading pipeline and keeps
//! a running tally. The pipeline itself stays stateless; everything carried
//! between frames lives in [`AnswerTally`].

use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, FrameSource};
use crate::error::GradeError;
use crate::vision::{AnswerKey, GradeResult, GradingPipeline};

/// Unreadable frames in a row after which a scan gives up on its source
pub const MAX_CONSECUTIVE_FAILURES: usize = 25;

/// Accumulated answers over a live scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerTally {
    /// Latest decoded answers from a graded frame
    pub answers: BTreeMap<u32, Option<usize>>,
    pub frames_seen: usize,
    pub frames_graded: usize,
    /// Reads that failed before a frame reached the pipeline
    pub frames_failed: usize,
    pub last_score: Option<f64>,
    pub best_score: Option<f64>,
}

impl AnswerTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into the tally. Degraded frames only count as seen.
    pub fn absorb(mut self, result: &GradeResult) -> Self {
        self.frames_seen += 1;
        if !result.is_graded() {
            return self;
        }

        self.frames_graded += 1;
        self.answers = result.detected_answers.clone();
        self.last_score = Some(result.percentage_score);
        self.best_score = Some(
            self.best_score
                .map_or(result.percentage_score, |best| best.max(result.percentage_score)),
        );
        self
    }

    pub fn has_answers(&self) -> bool {
        !self.answers.is_empty()
    }

    /// Every read from the source, successful or not
    pub fn frames_read(&self) -> usize {
        self.frames_seen + self.frames_failed
    }
}

/// Outcome of a scan: the tally plus the last graded result, if any
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub tally: AnswerTally,
    pub last_graded: Option<GradeResult>,
}

/// Grade frames until the source runs dry, `stop` fires or `max_frames` reads are made.
///
/// Frames that fail to decode are logged, counted against `max_frames` and
/// skipped. An unavailable source, or [`MAX_CONSECUTIVE_FAILURES`] bad reads
/// in a row, ends the scan. A disconnected stop channel is treated as a stop
/// request.
pub fn run_scan<S: FrameSource + ?Sized>(
    source: &mut S,
    pipeline: &GradingPipeline,
    key: &AnswerKey,
    stop: &Receiver<()>,
    max_frames: Option<usize>,
) -> Result<ScanSummary, GradeError> {
    key.ensure_gradable()?;

    let mut summary = ScanSummary::default();
    let mut consecutive_failures = 0;
    loop {
        match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                info!("Scan stopped on request");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        if max_frames.is_some_and(|max| summary.tally.frames_read() >= max) {
            debug!("Frame limit reached");
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Frame source exhausted");
                break;
            }
            Err(CaptureError::Unavailable(reason)) => {
                warn!("Frame source lost: {}", reason);
                break;
            }
            Err(e) => {
                warn!("Skipping unreadable frame: {}", e);
                summary.tally.frames_failed += 1;
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("Giving up after {} unreadable frames in a row", consecutive_failures);
                    break;
                }
                continue;
            }
        };
        consecutive_failures = 0;

        let result = pipeline.grade(&frame.image, key)?;
        summary.tally = summary.tally.absorb(&result);
        if result.is_graded() {
            summary.last_graded = Some(result);
        }
    }

    info!(
        "Scan finished: {} frames, {} graded, {} unreadable",
        summary.tally.frames_seen, summary.tally.frames_graded, summary.tally.frames_failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;
    use crate::vision::GradeStatus;
    use crossbeam_channel::unbounded;
    use image::{Rgb, RgbImage};

    fn result(status: GradeStatus, score: f64, answers: &[(u32, Option<usize>)]) -> GradeResult {
        GradeResult {
            status,
            percentage_score: score,
            per_question_correctness: vec![],
            detected_answers: answers.iter().copied().collect(),
            annotated_frame: RgbImage::new(1, 1),
            processing_time_ms: 0,
        }
    }

    struct BlankFrames {
        left: usize,
        failures: usize,
    }

    impl FrameSource for BlankFrames {
        fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(CaptureError::InvalidFrame { width: 60, height: 40 });
            }
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            Ok(Some(CapturedFrame::new(RgbImage::from_pixel(60, 40, Rgb([255, 255, 255])))))
        }
    }

    fn key() -> AnswerKey {
        AnswerKey::from_ordered(&[0, 1], 4).unwrap()
    }

    #[test]
    fn test_tally_overwrites_with_latest_graded_frame() {
        let tally = AnswerTally::new()
            .absorb(&result(GradeStatus::Graded, 50.0, &[(1, Some(0)), (2, None)]))
            .absorb(&result(GradeStatus::NoSheetDetected, 0.0, &[]))
            .absorb(&result(GradeStatus::Graded, 25.0, &[(1, Some(2)), (2, Some(1))]));

        assert_eq!(tally.frames_seen, 3);
        assert_eq!(tally.frames_graded, 2);
        assert_eq!(tally.answers[&1], Some(2));
        assert_eq!(tally.last_score, Some(25.0));
        assert_eq!(tally.best_score, Some(50.0));
    }

    #[test]
    fn test_degraded_frames_keep_previous_answers() {
        let tally = AnswerTally::new()
            .absorb(&result(GradeStatus::Graded, 100.0, &[(1, Some(0))]))
            .absorb(&result(GradeStatus::GeometryDegenerate, 0.0, &[]));
        assert!(tally.has_answers());
        assert_eq!(tally.last_score, Some(100.0));
    }

    #[test]
    fn test_scan_runs_until_source_is_exhausted() {
        let (_stop_tx, stop_rx) = unbounded();
        let mut source = BlankFrames { left: 3, failures: 1 };

        let summary = run_scan(&mut source, &GradingPipeline::new(), &key(), &stop_rx, None).unwrap();
        assert_eq!(summary.tally.frames_seen, 3);
        assert_eq!(summary.tally.frames_failed, 1);
        assert_eq!(summary.tally.frames_graded, 0);
        assert!(summary.last_graded.is_none());
    }

    #[test]
    fn test_failed_reads_count_toward_frame_limit() {
        let (_stop_tx, stop_rx) = unbounded();
        let mut source = BlankFrames { left: 10, failures: 100 };

        let summary = run_scan(&mut source, &GradingPipeline::new(), &key(), &stop_rx, Some(5)).unwrap();
        assert_eq!(summary.tally.frames_failed, 5);
        assert_eq!(summary.tally.frames_seen, 0);
        assert_eq!(source.failures, 95);
    }

    #[test]
    fn test_scan_gives_up_on_a_source_that_keeps_failing() {
        let (_stop_tx, stop_rx) = unbounded();
        let mut source = BlankFrames {
            left: 0,
            failures: usize::MAX,
        };

        let summary = run_scan(&mut source, &GradingPipeline::new(), &key(), &stop_rx, None).unwrap();
        assert_eq!(summary.tally.frames_failed, MAX_CONSECUTIVE_FAILURES);
        assert_eq!(summary.tally.frames_seen, 0);
    }

    #[test]
    fn test_scan_honors_frame_limit_and_stop() {
        let (stop_tx, stop_rx) = unbounded();
        let mut source = BlankFrames { left: 10, failures: 0 };

        let summary = run_scan(&mut source, &GradingPipeline::new(), &key(), &stop_rx, Some(2)).unwrap();
        assert_eq!(summary.tally.frames_seen, 2);

        stop_tx.send(()).unwrap();
        let summary = run_scan(&mut source, &GradingPipeline::new(), &key(), &stop_rx, None).unwrap();
        assert_eq!(summary.tally.frames_seen, 0);
        assert_eq!(source.left, 8);
    }

    #[test]
    fn test_scan_rejects_empty_key() {
        let (_stop_tx, stop_rx) = unbounded();
        let mut source = BlankFrames { left: 1, failures: 0 };
        let empty = AnswerKey::from_ordered(&[], 4).unwrap();
        assert!(run_scan(&mut source, &GradingPipeline::new(), &empty, &stop_rx, None).is_err());
    }
}
