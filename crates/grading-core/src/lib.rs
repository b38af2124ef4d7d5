//! Grading Core: rubric grading pipeline
//!
//! Grades a free-text submission against a rubric by scoring every criterion
//! in parallel through an [`Evaluator`], aggregating the scores into a letter
//! grade, holding edge-case grades for human approval, and finally producing
//! structured feedback.
//!
//! ## Key Components
//!
//! - [`validator`]: rubric structure checks
//! - [`grading`]: parallel per-criterion grading
//! - [`aggregator`]: totals, percentage, letter grade and approval flag
//! - [`approval`]: the persisted suspend/resume gate
//! - [`feedback`]: final feedback generation
//! - [`PipelineOrchestrator`]: stage sequencing and persistence

pub mod aggregator;
pub mod approval;
pub mod config;
pub mod domain;
pub mod evaluator;
pub mod feedback;
pub mod grading;
pub mod obs;
pub mod orchestrator;
pub mod run_store;
pub mod telemetry;
pub mod validator;

pub use aggregator::ScoreAggregator;
pub use approval::{ApprovalGate, ApprovalSummary, GateState, PendingApproval};
pub use config::GradingConfig;
pub use domain::{
    AggregationResult, ApprovalDecision, Criterion, CriterionResult, ErrorKind, ErrorReport,
    FeedbackResult, GradingError, GradingReport, GradingResult, LetterGrade, PipelineRun,
    ResumeRejection, ReviewStatus, Rubric, Stage,
};
pub use evaluator::{
    CriterionPrompt, CriterionVerdict, Evaluator, EvaluatorError, FeedbackDraft, FeedbackPrompt,
};
pub use feedback::FeedbackGenerator;
pub use grading::CriterionEvaluator;
pub use orchestrator::{GradingOutcome, PipelineOrchestrator};
pub use run_store::RunStore;
pub use telemetry::init_tracing;
pub use validator::{parse_rubric_json, validate, validate_str, ValidationOk};

pub use grading_state::{SessionId, SessionStore};
