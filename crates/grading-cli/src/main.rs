//! Grader CLI - rubric grading pipeline
//!
//! The `grader` command grades a submission against a rubric and drives the
//! human approval step for edge-case grades.
//!
//! ## Commands
//!
//! - `validate`: Check a rubric's structure
//! - `grade`: Grade a submission (may suspend for approval)
//! - `resume`: Approve or reject a suspended grade
//! - `status`: Show a run snapshot
//! - `list`: List persisted runs
//!
//! Results are printed to stdout as JSON. Pipeline failures print a
//! structured error report and exit with status 2.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

use grading_core::telemetry::default_level;
use grading_core::{
    parse_rubric_json, validate_str, ApprovalDecision, Evaluator, GradingConfig, GradingResult,
    PipelineOrchestrator, PipelineRun, SessionId, Stage,
};
use grading_evaluator::{HttpEvaluator, HttpEvaluatorConfig, RetryConfig, RetryingEvaluator};
use grading_state::SurrealSessionStore;

const PIPELINE_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "grader")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rubric grading pipeline with human approval", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a rubric file
    Validate {
        /// Path to the rubric (JSON)
        #[arg(short, long)]
        rubric: PathBuf,
    },

    /// Grade a submission against a rubric
    Grade {
        /// Path to the rubric (JSON)
        #[arg(short, long)]
        rubric: PathBuf,

        /// Path to the submission text
        #[arg(short, long)]
        submission: PathBuf,

        /// Session id to use (generated if omitted)
        #[arg(long)]
        session_id: Option<SessionId>,
    },

    /// Approve or reject a grade that is awaiting approval
    Resume {
        #[arg(long)]
        session_id: SessionId,

        /// Confirm the grade
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,

        /// Reject the grade; feedback is still produced and flagged for re-review
        #[arg(long)]
        reject: bool,

        /// Who made the decision
        #[arg(long)]
        by: String,
    },

    /// Show the current state of a run
    Status {
        #[arg(long)]
        session_id: SessionId,
    },

    /// List persisted runs
    List {
        /// Only runs in this stage (e.g. awaiting_approval)
        #[arg(long)]
        stage: Option<Stage>,
    },
}

/// One line of `list` output.
#[derive(Debug, Serialize)]
struct RunSummary {
    session_id: SessionId,
    stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    rubric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grade: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            session_id: run.session_id.clone(),
            stage: run.stage,
            rubric: run.rubric.as_ref().map(|r| r.name.clone()),
            grade: run.aggregation.as_ref().map(|a| a.grade_line()),
            updated_at: run.updated_at,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    grading_core::init_tracing(cli.json, default_level(cli.verbose));

    match cli.command {
        Commands::Validate { rubric } => cmd_validate(&rubric),
        Commands::Grade {
            rubric,
            submission,
            session_id,
        } => cmd_grade(&rubric, &submission, session_id).await,
        Commands::Resume {
            session_id,
            approve,
            reject: _,
            by,
        } => cmd_resume(&session_id, approve, &by).await,
        Commands::Status { session_id } => cmd_status(&session_id).await,
        Commands::List { stage } => cmd_list(stage).await,
    }
}

/// Check a rubric without touching storage or the model
fn cmd_validate(rubric: &Path) -> Result<ExitCode> {
    let raw = read_text(rubric)?;
    report(validate_str(&raw))
}

/// Run the pipeline on a submission
async fn cmd_grade(
    rubric: &Path,
    submission: &Path,
    session_id: Option<SessionId>,
) -> Result<ExitCode> {
    let rubric_raw = read_text(rubric)?;
    let submission = read_text(submission)?;
    let rubric = match parse_rubric_json(&rubric_raw) {
        Ok(value) => value,
        Err(err) => return report::<()>(Err(err)),
    };

    let orchestrator = orchestrator(true).await?;
    report(
        orchestrator
            .submit_for_grading(rubric, &submission, session_id)
            .await,
    )
}

/// Resolve a suspended run
async fn cmd_resume(session_id: &SessionId, approve: bool, by: &str) -> Result<ExitCode> {
    let decision = ApprovalDecision::new(approve, by);
    let orchestrator = orchestrator(true).await?;
    report(orchestrator.resume_grading(session_id, decision).await)
}

/// Print a run snapshot
async fn cmd_status(session_id: &SessionId) -> Result<ExitCode> {
    let orchestrator = orchestrator(false).await?;
    report(orchestrator.get_run_status(session_id).await)
}

/// Print a summary line per stored run
async fn cmd_list(stage: Option<Stage>) -> Result<ExitCode> {
    let orchestrator = orchestrator(false).await?;
    let runs = orchestrator
        .list_runs(stage)
        .await
        .map(|runs| runs.iter().map(RunSummary::from).collect::<Vec<_>>());
    report(runs)
}

/// Wire storage, configuration and the evaluator from the environment.
///
/// `status` and `list` never call the model, so they tolerate a missing
/// evaluator configuration.
async fn orchestrator(needs_model: bool) -> Result<PipelineOrchestrator> {
    let config = GradingConfig::from_env().context("Invalid grading configuration")?;
    let store = SurrealSessionStore::from_env()
        .await
        .context("Failed to open grading session store")?;
    let evaluator = evaluator(needs_model)?;
    PipelineOrchestrator::new(config, evaluator, Arc::new(store))
        .context("Failed to build grading pipeline")
}

fn evaluator(needs_model: bool) -> Result<Arc<dyn Evaluator>> {
    let config = match HttpEvaluatorConfig::from_env() {
        Ok(config) => config,
        Err(err) if !needs_model => {
            debug!(error = %err, "evaluator not configured");
            HttpEvaluatorConfig::default()
        }
        Err(err) => return Err(err).context("Failed to configure evaluator"),
    };
    let http = HttpEvaluator::new(config).context("Failed to create HTTP client")?;
    Ok(Arc::new(RetryingEvaluator::new(http, RetryConfig::default())))
}

/// Print the value, or the structured error report on pipeline failure.
fn report<T: Serialize>(result: GradingResult<T>) -> Result<ExitCode> {
    Ok(ExitCode::from(print_result(result)?))
}

fn print_result<T: Serialize>(result: GradingResult<T>) -> Result<u8> {
    match result {
        Ok(value) => {
            print_json(&value)?;
            Ok(0)
        }
        Err(err) => {
            print_json(&err.report())?;
            Ok(PIPELINE_FAILURE)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}
