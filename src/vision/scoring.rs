//! Answer decoding and scoring against an answer key

use ndarray::ArrayView1;
use std::collections::BTreeMap;

use super::grid::GridSample;
use crate::error::GradeError;

/// Correct choice per question, numbered 1..=N
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerKey {
    answers: Vec<usize>,
    choice_count: usize,
}

impl AnswerKey {
    /// Build a key from question number -> choice index.
    ///
    /// Question numbers must run 1..=N without gaps and every choice must be
    /// below `choice_count`. An empty map is accepted here; grading it fails.
    pub fn new(answers: &BTreeMap<u32, usize>, choice_count: usize) -> Result<Self, GradeError> {
        if choice_count == 0 {
            return Err(GradeError::InvalidAnswerKey("choice count is zero".to_string()));
        }

        let mut ordered = Vec::with_capacity(answers.len());
        for (expected, (&q_no, &choice)) in (1u32..).zip(answers.iter()) {
            if q_no != expected {
                return Err(GradeError::InvalidAnswerKey(format!(
                    "question numbers must be contiguous from 1, found {} where {} was expected",
                    q_no, expected
                )));
            }
            if choice >= choice_count {
                return Err(GradeError::InvalidAnswerKey(format!(
                    "question {} answer index {} is outside 0..{}",
                    q_no, choice, choice_count
                )));
            }
            ordered.push(choice);
        }

        Ok(Self {
            answers: ordered,
            choice_count,
        })
    }

    /// Build a key from answers listed in question order
    pub fn from_ordered(answers: &[usize], choice_count: usize) -> Result<Self, GradeError> {
        let map: BTreeMap<u32, usize> = (1u32..).zip(answers.iter().copied()).collect();
        Self::new(&map, choice_count)
    }

    pub fn question_count(&self) -> usize {
        self.answers.len()
    }

    pub fn choice_count(&self) -> usize {
        self.choice_count
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Correct choice for a 1-based question number
    pub fn answer(&self, q_no: u32) -> Option<usize> {
        let idx = (q_no as usize).checked_sub(1)?;
        self.answers.get(idx).copied()
    }

    /// (question number, correct choice) in question order
    pub fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        (1u32..).zip(self.answers.iter().copied())
    }

    /// Fail with `InvalidAnswerKey` unless there is at least one question
    pub fn ensure_gradable(&self) -> Result<(), GradeError> {
        if self.answers.is_empty() {
            return Err(GradeError::InvalidAnswerKey("answer key has no questions".to_string()));
        }
        Ok(())
    }
}

/// Pick the marked choice in one row.
///
/// The first maximum wins. `None` when the maximum does not exceed `min_fill`.
pub fn decode_row(row: ArrayView1<'_, u32>, min_fill: u32) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, &value) in row.iter().enumerate() {
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((idx, value)),
        }
    }
    best.filter(|&(_, max)| max > min_fill).map(|(idx, _)| idx)
}

/// Decode every row of a sample
pub fn decode(sample: &GridSample, min_fill: u32) -> Vec<Option<usize>> {
    (0..sample.questions())
        .map(|q| decode_row(sample.row(q), min_fill))
        .collect()
}

/// Outcome of comparing decoded answers with a key
#[derive(Debug, Clone, PartialEq)]
pub struct Scorecard {
    /// Percentage of correct questions in [0, 100]
    pub percentage: f64,
    /// Correctness per question, in question order
    pub correctness: Vec<bool>,
    /// Decoded answer per question number
    pub detected: BTreeMap<u32, Option<usize>>,
}

impl Scorecard {
    pub fn correct_count(&self) -> usize {
        self.correctness.iter().filter(|&&ok| ok).count()
    }

    pub fn question_count(&self) -> usize {
        self.correctness.len()
    }
}

/// Compare decoded answers (index 0 = question 1) with the key
pub fn score(detected: &[Option<usize>], key: &AnswerKey) -> Result<Scorecard, GradeError> {
    key.ensure_gradable()?;
    if detected.len() != key.question_count() {
        return Err(GradeError::ShapeMismatch {
            questions: key.question_count(),
            choices: key.choice_count(),
            got_questions: detected.len(),
            got_choices: key.choice_count(),
        });
    }

    let correctness: Vec<bool> = key
        .iter()
        .zip(detected.iter())
        .map(|((_, correct), &found)| found == Some(correct))
        .collect();

    let correct = correctness.iter().filter(|&&ok| ok).count();
    let percentage = correct as f64 / key.question_count() as f64 * 100.0;

    let detected = (1u32..).zip(detected.iter().copied()).collect();

    Ok(Scorecard {
        percentage,
        correctness,
        detected,
    })
}

/// Decode a sample and score it against the key
pub fn grade_sample(sample: &GridSample, key: &AnswerKey, min_fill: u32) -> Result<Scorecard, GradeError> {
    key.ensure_gradable()?;
    if sample.questions() != key.question_count() || sample.choices() != key.choice_count() {
        return Err(GradeError::ShapeMismatch {
            questions: key.question_count(),
            choices: key.choice_count(),
            got_questions: sample.questions(),
            got_choices: sample.choices(),
        });
    }
    score(&decode(sample, min_fill), key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn abcd_key() -> AnswerKey {
        AnswerKey::from_ordered(&[0, 1, 2, 3], 4).unwrap()
    }

    fn diagonal_sample() -> GridSample {
        GridSample::new(array![
            [900, 10, 20, 5],
            [15, 880, 30, 0],
            [0, 12, 950, 40],
            [8, 3, 25, 910],
        ])
    }

    #[test]
    fn test_key_rejects_gaps() {
        let mut answers = BTreeMap::new();
        answers.insert(1, 0);
        answers.insert(3, 1);
        assert!(matches!(
            AnswerKey::new(&answers, 4),
            Err(GradeError::InvalidAnswerKey(_))
        ));
    }

    #[test]
    fn test_key_rejects_out_of_range_choice() {
        assert!(AnswerKey::from_ordered(&[0, 4], 4).is_err());
        assert!(AnswerKey::from_ordered(&[0], 0).is_err());
    }

    #[test]
    fn test_key_lookup() {
        let key = abcd_key();
        assert_eq!(key.answer(1), Some(0));
        assert_eq!(key.answer(4), Some(3));
        assert_eq!(key.answer(0), None);
        assert_eq!(key.answer(5), None);
    }

    #[test]
    fn test_all_correct_scores_100() {
        let card = grade_sample(&diagonal_sample(), &abcd_key(), 0).unwrap();
        assert_eq!(card.percentage, 100.0);
        assert_eq!(card.correctness, vec![true, true, true, true]);
        assert_eq!(card.detected[&2], Some(1));
    }

    #[test]
    fn test_one_wrong_scores_75() {
        let mut cells = diagonal_sample().cells().clone();
        cells[[1, 0]] = 990;

        let card = grade_sample(&GridSample::new(cells), &abcd_key(), 0).unwrap();
        assert_eq!(card.percentage, 75.0);
        assert_eq!(card.correctness, vec![true, false, true, true]);
        assert_eq!(card.detected[&2], Some(0));
        assert_eq!(card.correct_count(), 3);
    }

    #[test]
    fn test_first_max_wins_ties() {
        let sample = GridSample::new(array![[5, 40, 40, 1]]);
        assert_eq!(decode(&sample, 0), vec![Some(1)]);
    }

    #[test]
    fn test_decode_is_scale_invariant() {
        let rows = [[3u32, 70, 9, 11], [120, 4, 4, 0], [1, 1, 2, 60]];
        for row in rows {
            let base = GridSample::new(Array2::from_shape_vec((1, 4), row.to_vec()).unwrap());
            for factor in [2u32, 7, 50] {
                let scaled = GridSample::new(base.cells().mapv(|v| v * factor));
                assert_eq!(decode(&base, 0), decode(&scaled, 0));
            }
        }
    }

    #[test]
    fn test_unanswered_rows_use_none() {
        let sample = GridSample::new(array![[0, 0, 0, 0], [10, 30, 0, 0], [10, 200, 0, 0]]);
        assert_eq!(decode(&sample, 0), vec![None, Some(1), Some(1)]);
        assert_eq!(decode(&sample, 100), vec![None, None, Some(1)]);

        let key = AnswerKey::from_ordered(&[0, 1, 1], 4).unwrap();
        let card = score(&decode(&sample, 100), &key).unwrap();
        assert_eq!(card.correctness, vec![false, false, true]);
    }

    #[test]
    fn test_score_is_monotonic_in_correct_rows() {
        let key = AnswerKey::from_ordered(&[0, 1, 2, 3, 0, 1], 4).unwrap();
        let mut detected: Vec<Option<usize>> = vec![Some(3); 6];
        let mut last = score(&detected, &key).unwrap().percentage;
        for q in 0..6 {
            detected[q] = key.answer(q as u32 + 1);
            let next = score(&detected, &key).unwrap().percentage;
            assert!(next >= last);
            last = next;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let key = AnswerKey::from_ordered(&[], 4).unwrap();
        assert!(key.is_empty());
        assert!(matches!(score(&[], &key), Err(GradeError::InvalidAnswerKey(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let key = AnswerKey::from_ordered(&[0, 1], 4).unwrap();
        let err = grade_sample(&diagonal_sample(), &key, 0).unwrap_err();
        assert!(matches!(err, GradeError::ShapeMismatch { .. }));
    }
}
