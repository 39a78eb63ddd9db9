//! Question bank and printed sheet layout
//!
//! The bank holds questions in authoring order; the layout records which
//! question was printed in which row, so shuffled sheets grade correctly.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::vision::AnswerKey;

/// A multiple-choice question as authored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub q_no: u32,
    pub text: String,
    /// Option letter -> option text
    pub choices: BTreeMap<String, String>,
    /// Letter of the correct option
    pub answer: String,
}

/// One printed row of a generated sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
    /// 1-based row on the printed sheet
    pub printed_index: u32,
    /// Question number in the bank
    pub original_q_no: u32,
    /// Option letter -> bubble rectangle `[x, y, w, h]` on the printed page
    #[serde(default)]
    pub options: BTreeMap<String, [u32; 4]>,
}

/// Load questions from a JSON array
pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let questions: Vec<Question> =
        serde_json::from_str(&content).with_context(|| format!("Invalid question bank {}", path.display()))?;
    debug!("Loaded {} questions from {}", questions.len(), path.display());
    Ok(questions)
}

/// Save questions as a JSON array
pub fn save_questions(questions: &[Question], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(questions)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Check an authored question and turn it into a bank entry.
///
/// Needs non-empty text, exactly `choice_count` non-empty options (lettered
/// A, B, ...) and an answer naming one of them. The question number is
/// assigned when the question is added to a bank.
pub fn author_question(text: &str, options: &[String], answer: &str, choice_count: usize) -> Result<Question> {
    let text = text.trim();
    if text.is_empty() {
        bail!("Question text is empty");
    }
    if options.len() != choice_count {
        bail!("Expected {} options, got {}", choice_count, options.len());
    }

    let mut choices = BTreeMap::new();
    for (index, option) in options.iter().enumerate() {
        let letter = choice_letter(Some(index));
        if option.trim().is_empty() {
            bail!("Option {} is empty", letter);
        }
        choices.insert(letter, option.trim().to_string());
    }

    let answer = match choice_index(answer) {
        Some(index) if index < choice_count => choice_letter(Some(index)),
        _ => bail!(
            "Answer {:?} is not one of {}",
            answer,
            choices.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    };

    Ok(Question {
        q_no: 0,
        text: text.to_string(),
        choices,
        answer,
    })
}

/// Add questions to the bank at `path` and number the whole bank 1, 2, 3, ...
///
/// A missing or unreadable bank starts empty. Returns the saved bank.
pub fn append_questions(path: &Path, new_questions: Vec<Question>) -> Result<Vec<Question>> {
    let mut bank = if path.exists() {
        load_questions(path).unwrap_or_else(|e| {
            warn!("Starting a new question bank: {:#}", e);
            vec![]
        })
    } else {
        vec![]
    };

    bank.extend(new_questions);
    for (i, question) in bank.iter_mut().enumerate() {
        question.q_no = i as u32 + 1;
    }

    save_questions(&bank, path)?;
    debug!("Question bank {} now holds {} questions", path.display(), bank.len());
    Ok(bank)
}

/// Load a printed layout from a JSON array
pub fn load_layout(path: &Path) -> Result<Vec<LayoutEntry>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let layout: Vec<LayoutEntry> =
        serde_json::from_str(&content).with_context(|| format!("Invalid layout {}", path.display()))?;
    Ok(layout)
}

/// Save a printed layout as a JSON array
pub fn save_layout(layout: &[LayoutEntry], path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(layout)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Questions in printed order. Layout rows naming unknown questions are skipped.
pub fn printed_questions<'a>(questions: &'a [Question], layout: &[LayoutEntry]) -> Vec<&'a Question> {
    let by_number: BTreeMap<u32, &Question> = questions.iter().map(|q| (q.q_no, q)).collect();

    let mut rows: Vec<&LayoutEntry> = layout.iter().collect();
    rows.sort_by_key(|entry| entry.printed_index);

    rows.into_iter()
        .filter_map(|entry| {
            let found = by_number.get(&entry.original_q_no).copied();
            if found.is_none() {
                warn!(
                    "Printed row {} refers to missing question {}",
                    entry.printed_index, entry.original_q_no
                );
            }
            found
        })
        .collect()
}

/// Answer key for a printed sheet: row i holds the i-th printed question
pub fn build_answer_key(questions: &[Question], layout: &[LayoutEntry], choice_count: usize) -> Result<AnswerKey> {
    let mut answers = Vec::new();
    for question in printed_questions(questions, layout) {
        let Some(index) = choice_index(&question.answer) else {
            bail!("Question {} has invalid answer {:?}", question.q_no, question.answer);
        };
        answers.push(index);
    }
    Ok(AnswerKey::from_ordered(&answers, choice_count)?)
}

/// A key entry: either a letter (`"B"`) or a zero-based index (`1`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KeyChoice {
    Index(usize),
    Letter(String),
}

/// Load an answer key from a JSON object mapping question number to choice,
/// e.g. `{"1": "A", "2": 3}`
pub fn load_answer_key(path: &Path, choice_count: usize) -> Result<AnswerKey> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: BTreeMap<String, KeyChoice> =
        serde_json::from_str(&content).with_context(|| format!("Invalid answer key {}", path.display()))?;

    let mut answers = BTreeMap::new();
    for (q_no, choice) in raw {
        let q: u32 = q_no
            .trim()
            .parse()
            .with_context(|| format!("Question number {:?} is not a number", q_no))?;
        let index = match choice {
            KeyChoice::Index(index) => index,
            KeyChoice::Letter(letter) => {
                choice_index(&letter).with_context(|| format!("Question {} has invalid answer {:?}", q, letter))?
            }
        };
        answers.insert(q, index);
    }
    Ok(AnswerKey::new(&answers, choice_count)?)
}

/// Letter for a choice index (0 = A); `-` when unanswered
pub fn choice_letter(choice: Option<usize>) -> String {
    match choice {
        Some(index) if index < 26 => char::from(b'A' + index as u8).to_string(),
        Some(index) => index.to_string(),
        None => "-".to_string(),
    }
}

/// Choice index for a single letter, case-insensitive
pub fn choice_index(letter: &str) -> Option<usize> {
    let mut chars = letter.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_uppercase() {
        return None;
    }
    Some((c as u8 - b'A') as usize)
}
