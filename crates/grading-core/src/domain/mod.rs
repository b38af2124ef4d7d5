//! Domain models for the grading pipeline.
//!
//! - `Rubric` / `Criterion`: what a submission is graded against
//! - `CriterionResult` / `AggregationResult`: scores produced by a run
//! - `PipelineRun`: one grading session and its stage
//! - `GradingError`: the error taxonomy shared by every stage

pub mod error;
pub mod feedback;
pub mod grade;
pub mod rubric;
pub mod run;

pub use error::{ErrorKind, ErrorReport, GradingError, GradingResult, ResumeRejection};
pub use feedback::{ApprovalDecision, FeedbackResult};
pub use grade::{AggregationResult, CriterionResult, LetterGrade};
pub use rubric::{Criterion, Rubric};
pub use run::{FailureRecord, GradingReport, PipelineRun, ReviewStatus, Stage};
