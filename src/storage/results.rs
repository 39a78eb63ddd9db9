//! Graded-results log
//!
//! One CSV row per graded sheet: `student_id,answers,score,total`.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::info;

use super::question_bank::choice_letter;
use crate::vision::GradeResult;

const HEADER: [&str; 4] = ["student_id", "answers", "score", "total"];

/// A single row of the results log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub student_id: String,
    /// Answers as `1:A 2:C 3:-`
    pub answers: String,
    /// Number of correct answers
    pub score: usize,
    /// Number of questions
    pub total: usize,
}

impl ResultRecord {
    pub fn from_grade(student_id: &str, result: &GradeResult) -> Self {
        Self {
            student_id: student_id.to_string(),
            answers: format_answers(&result.detected_answers),
            score: result.correct_count(),
            total: result.per_question_correctness.len(),
        }
    }
}

/// Render decoded answers as `1:A 2:C 3:-`
pub fn format_answers(answers: &BTreeMap<u32, Option<usize>>) -> String {
    answers
        .iter()
        .map(|(q_no, choice)| format!("{}:{}", q_no, choice_letter(*choice)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append a record, writing the header first when the log is new or empty
pub fn append_result(path: &Path, record: &ResultRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open results log {}", path.display()))?;

    let mut writer = WriterBuilder::new().has_headers(is_new).from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;

    info!(
        "Recorded {} ({}/{}) in {}",
        record.student_id,
        record.score,
        record.total,
        path.display()
    );
    Ok(())
}

/// Read every record; a missing log reads as empty
pub fn read_results(path: &Path) -> Result<Vec<ResultRecord>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open results log {}", path.display()))?;

    let mut records = vec![];
    for row in reader.deserialize() {
        let record: ResultRecord = row.with_context(|| format!("Malformed row in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

/// Drop the records `doomed` picks, given each row's 0-based position.
///
/// The log is rewritten with its header. Returns how many rows were removed;
/// a missing log has nothing to remove.
pub fn remove_results<F>(path: &Path, mut doomed: F) -> Result<usize>
where
    F: FnMut(usize, &ResultRecord) -> bool,
{
    let records = read_results(path)?;
    let before = records.len();
    let kept: Vec<ResultRecord> = records
        .into_iter()
        .enumerate()
        .filter(|(index, record)| !doomed(*index, record))
        .map(|(_, record)| record)
        .collect();

    let removed = before - kept.len();
    if removed == 0 {
        return Ok(0);
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to rewrite results log {}", path.display()))?;
    writer.write_record(HEADER)?;
    for record in &kept {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!("Removed {} records from {}", removed, path.display());
    Ok(removed)
}

/// Remove every record, keeping only the header
pub fn clear_results(path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to reset results log {}", path.display()))?;
    writer.write_record(HEADER)?;
    writer.flush()?;
    Ok(())
}
