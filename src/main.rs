//! omr-grader - Grade photographed multiple-choice answer sheets
//!
//! Reads sheet photos from disk, grades them against an answer key and
//! writes annotated images and a results log. Also authors question banks
//! and prints blank sheets for them.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use omr_grader::capture::{CapturedFrame, ImageSequence};
use omr_grader::config::{self, AppConfig};
use omr_grader::session::run_scan;
use omr_grader::sheet::{generate_sheet, SheetTemplate};
use omr_grader::storage::{self, question_bank, results};
use omr_grader::vision::{AnswerKey, GradeResult, GradeStatus, GradingPipeline, PipelineConfig};

/// omr-grader - Grade multiple-choice answer sheets from photos
#[derive(Parser, Debug)]
#[command(name = "omr-grader")]
#[command(about = "Detects, reads and scores photographed OMR answer sheets")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grade a single sheet photo
    Grade {
        /// Sheet photo
        image: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Where to write the annotated photo
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Student identifier recorded in the results log
        #[arg(short, long)]
        student: Option<String>,

        /// Results log (CSV); defaults to the configured log
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Grade every image in a directory as frames of one live scan
    Scan {
        /// Image file or directory of frames
        path: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<usize>,

        /// Where to write the last annotated frame
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add a question to a question bank
    AddQuestion {
        /// Question bank JSON, created when missing
        #[arg(long)]
        bank: PathBuf,

        /// Question text
        #[arg(long)]
        text: String,

        /// Option text, once per choice in order (A, B, ...)
        #[arg(long = "option", required = true)]
        options: Vec<String>,

        /// Letter of the correct option
        #[arg(long)]
        answer: String,
    },

    /// Render a printable answer sheet and its layout for a question bank
    GenerateSheet {
        /// Question bank JSON
        #[arg(long)]
        bank: PathBuf,

        /// Directory for answer_sheet.png, questions.png, layout.json and printed_order.json
        #[arg(short, long, default_value = "sheet")]
        out_dir: PathBuf,
    },

    /// Inspect or edit the results log
    Results {
        /// Results log (CSV); defaults to the configured log
        #[arg(long)]
        log: Option<PathBuf>,

        #[command(subcommand)]
        action: ResultsAction,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination (defaults to the per-user config directory)
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ResultsAction {
    /// Print every record with its row number
    List,

    /// Delete records by row number or student
    Remove {
        /// Row numbers as printed by `list`
        #[arg(long = "row")]
        rows: Vec<usize>,

        /// Remove every record of this student
        #[arg(long)]
        student: Option<String>,
    },

    /// Delete every record, keeping the header
    Clear,
}

/// Where the answer key comes from
#[derive(Args, Debug)]
struct KeyArgs {
    /// Answer key JSON: {"1": "A", "2": "C", ...}
    #[arg(short, long, conflicts_with_all = ["questions", "layout"])]
    key: Option<PathBuf>,

    /// Question bank JSON (used with --layout)
    #[arg(long, requires = "layout")]
    questions: Option<PathBuf>,

    /// Printed layout JSON (used with --questions)
    #[arg(long, requires = "questions")]
    layout: Option<PathBuf>,
}

impl KeyArgs {
    fn load(&self, choice_count: usize) -> Result<AnswerKey> {
        match (&self.key, &self.questions, &self.layout) {
            (Some(key), _, _) => question_bank::load_answer_key(key, choice_count),
            (None, Some(questions), Some(layout)) => {
                let questions = question_bank::load_questions(questions)?;
                let layout = question_bank::load_layout(layout)?;
                question_bank::build_answer_key(&questions, &layout, choice_count)
            }
            _ => bail!("An answer key is required: pass --key, or --questions with --layout"),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig { path } => init_config(path),
        Command::Grade {
            image,
            key,
            output,
            student,
            results,
        } => {
            let config = load_or_create_config(cli.config.as_deref())?;
            grade(&config, &image, &key, output.as_deref(), student.as_deref(), results)
        }
        Command::Scan {
            path,
            key,
            max_frames,
            output,
        } => {
            let config = load_or_create_config(cli.config.as_deref())?;
            scan(&config, &path, &key, max_frames, output.as_deref())
        }
        Command::AddQuestion {
            bank,
            text,
            options,
            answer,
        } => {
            let config = load_or_create_config(cli.config.as_deref())?;
            let question = question_bank::author_question(&text, &options, &answer, config.sheet.choice_count)?;
            let saved = question_bank::append_questions(&bank, vec![question])?;
            println!("Question bank {} holds {} questions", bank.display(), saved.len());
            Ok(())
        }
        Command::GenerateSheet { bank, out_dir } => {
            let config = load_or_create_config(cli.config.as_deref())?;
            let questions = question_bank::load_questions(&bank)?;
            let template = SheetTemplate::with_choices(config.sheet.choice_count);
            generate_sheet(&questions, &template)?.save(&out_dir)?;
            println!("Sheet for {} questions written to {}", questions.len(), out_dir.display());
            Ok(())
        }
        Command::Results { log, action } => {
            let config = load_or_create_config(cli.config.as_deref())?;
            let path = match log.or_else(|| config.results.log_path.clone()) {
                Some(path) => path,
                None => storage::default_results_path()?,
            };
            manage_results(&path, action)
        }
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => storage::get_config_dir()?.join("config.toml"),
    };
    config::save_config(&AppConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn grade(
    config: &AppConfig,
    image: &Path,
    key_args: &KeyArgs,
    output: Option<&Path>,
    student: Option<&str>,
    results_path: Option<PathBuf>,
) -> Result<()> {
    let key = key_args.load(config.sheet.choice_count)?;
    let frame = CapturedFrame::open(image)?;
    let pipeline = GradingPipeline::with_config(PipelineConfig::from_app_config(config));

    let result = pipeline.grade(&frame.image, &key)?;
    print_result(&result);
    save_annotated(&result, output)?;

    if result.status != GradeStatus::Graded {
        return Ok(());
    }

    let results_path = match results_path.or_else(|| config.results.log_path.clone()) {
        Some(path) => Some(path),
        None if student.is_some() => Some(storage::default_results_path()?),
        None => None,
    };
    if let Some(path) = results_path {
        let student_id = student.unwrap_or("unknown");
        results::append_result(&path, &results::ResultRecord::from_grade(student_id, &result))?;
    }
    Ok(())
}

fn scan(
    config: &AppConfig,
    path: &Path,
    key_args: &KeyArgs,
    max_frames: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let key = key_args.load(config.sheet.choice_count)?;
    let mut source = ImageSequence::open(path)?;
    let pipeline = GradingPipeline::with_config(PipelineConfig::from_app_config(config));

    // Held for the duration of the scan so the channel stays open
    let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let summary = run_scan(&mut source, &pipeline, &key, &stop_rx, max_frames)?;

    let tally = &summary.tally;
    println!(
        "Frames: {} seen, {} graded, {} unreadable",
        tally.frames_seen, tally.frames_graded, tally.frames_failed
    );
    if let (Some(last), Some(best)) = (tally.last_score, tally.best_score) {
        println!("Score: {:.0}% (best {:.0}%)", last, best);
        println!("Answers: {}", results::format_answers(&tally.answers));
    } else {
        println!("No sheet was graded");
    }

    if let Some(result) = &summary.last_graded {
        save_annotated(result, output)?;
    }
    Ok(())
}

fn manage_results(path: &Path, action: ResultsAction) -> Result<()> {
    match action {
        ResultsAction::List => {
            let records = results::read_results(path)?;
            if records.is_empty() {
                println!("No records in {}", path.display());
            }
            for (row, record) in records.iter().enumerate() {
                println!(
                    "{:>4}  {:<16} {}/{}  {}",
                    row + 1,
                    record.student_id,
                    record.score,
                    record.total,
                    record.answers
                );
            }
        }
        ResultsAction::Remove { rows, student } => {
            if rows.is_empty() && student.is_none() {
                bail!("Pass --row or --student to choose records");
            }
            let removed = results::remove_results(path, |index, record| {
                rows.contains(&(index + 1)) || student.as_deref() == Some(record.student_id.as_str())
            })?;
            println!("Removed {} records", removed);
        }
        ResultsAction::Clear => {
            results::clear_results(path)?;
            println!("Cleared {}", path.display());
        }
    }
    Ok(())
}

fn print_result(result: &GradeResult) {
    match result.status {
        GradeStatus::Graded => {
            println!(
                "Score: {:.0}% ({}/{} correct) in {} ms",
                result.percentage_score,
                result.correct_count(),
                result.per_question_correctness.len(),
                result.processing_time_ms
            );
            println!("Answers: {}", results::format_answers(&result.detected_answers));
        }
        GradeStatus::NoSheetDetected => println!("No OMR sheet detected; retake the photo"),
        GradeStatus::GeometryDegenerate => println!("Sheet outline is unusable; retake the photo"),
    }
}

fn save_annotated(result: &GradeResult, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        result
            .annotated_frame
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Annotated image written to {}", path.display());
    }
    Ok(())
}
