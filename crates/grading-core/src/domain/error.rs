//! Error taxonomy for the grading pipeline.

use chrono::{DateTime, Utc};
use grading_state::StorageError;
use serde::{Deserialize, Serialize};

use super::run::{FailureRecord, Stage};

/// Why a resume request was refused. Refusals never mutate the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ResumeRejection {
    UnknownSession,
    NotAwaitingApproval { stage: Stage },
    /// The gate was already resolved with the opposite decision.
    AlreadyResolved { confirmed: bool },
    Expired { expired_at: DateTime<Utc> },
}

impl std::fmt::Display for ResumeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSession => write!(f, "unknown session"),
            Self::NotAwaitingApproval { stage } => {
                write!(f, "run is in stage {stage}, not awaiting approval")
            }
            Self::AlreadyResolved { confirmed } => write!(
                f,
                "gate already resolved as {}",
                if *confirmed { "approved" } else { "rejected" }
            ),
            Self::Expired { expired_at } => {
                write!(f, "approval window expired at {}", expired_at.to_rfc3339())
            }
        }
    }
}

/// Errors produced by the grading pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("rubric validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("evaluation failed for {subject}: {message}")]
    Evaluation { subject: String, message: String },

    #[error("cannot resume session {session_id}: {reason}")]
    InvalidResume {
        session_id: String,
        reason: ResumeRejection,
    },

    #[error("aggregation invariant violated: {0}")]
    AggregationInvariant(String),

    #[error("grading of session {session_id} was cancelled")]
    Cancelled { session_id: String },

    #[error("session {session_id} cannot be cancelled in stage {stage}")]
    NotCancellable { session_id: String, stage: Stage },

    #[error("session {session_id} already holds a different rubric or submission")]
    SessionConflict { session_id: String },

    /// Same input re-submitted to a run that stopped without a report.
    #[error("session {session_id} already ended in stage {stage}{}", stop_reason(.failure))]
    RunEnded {
        session_id: String,
        stage: Stage,
        failure: Option<Box<FailureRecord>>,
    },

    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn stop_reason(failure: &Option<Box<FailureRecord>>) -> String {
    failure
        .as_ref()
        .map(|f| format!(": {}", f.message))
        .unwrap_or_default()
}

/// Result type for grading operations.
pub type GradingResult<T> = std::result::Result<T, GradingError>;

/// Coarse error classification, stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Evaluation,
    InvalidResume,
    NotCancellable,
    AggregationInvariant,
    Cancelled,
    SessionConflict,
    RunEnded,
    Configuration,
    Internal,
    Storage,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Evaluation => "evaluation",
            Self::InvalidResume => "invalid_resume",
            Self::NotCancellable => "not_cancellable",
            Self::AggregationInvariant => "aggregation_invariant",
            Self::Cancelled => "cancelled",
            Self::SessionConflict => "session_conflict",
            Self::RunEnded => "run_ended",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
        }
    }

    /// Faults in the pipeline itself rather than in its inputs or collaborators.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::AggregationInvariant | Self::Internal)
    }
}

impl GradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Evaluation { .. } => ErrorKind::Evaluation,
            Self::InvalidResume { .. } => ErrorKind::InvalidResume,
            Self::NotCancellable { .. } => ErrorKind::NotCancellable,
            Self::AggregationInvariant(_) => ErrorKind::AggregationInvariant,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::SessionConflict { .. } => ErrorKind::SessionConflict,
            Self::RunEnded { .. } => ErrorKind::RunEnded,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::IllegalTransition { .. } => ErrorKind::Internal,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the caller can get past this error on its own, by fixing
    /// input, re-checking the run's status or trying again later.
    pub fn recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::Evaluation
                | ErrorKind::InvalidResume
                | ErrorKind::SessionConflict
                | ErrorKind::RunEnded
                | ErrorKind::Configuration
                | ErrorKind::Storage
        )
    }

    /// Render as a structured report for callers and the CLI.
    pub fn report(&self) -> ErrorReport {
        let details = match self {
            Self::Validation { errors } => errors.clone(),
            Self::RunEnded {
                failure: Some(failure),
                ..
            } => failure.details.clone(),
            _ => Vec::new(),
        };
        let suggestion = match self {
            Self::Validation { .. } => {
                Some("Fix the listed rubric problems and submit again".to_string())
            }
            Self::Evaluation { .. } => {
                Some("The evaluator is unavailable or misbehaving; submit again later".to_string())
            }
            Self::InvalidResume {
                reason: ResumeRejection::UnknownSession,
                ..
            } => Some("Check the session id".to_string()),
            Self::InvalidResume { .. } => {
                Some("Inspect the run with `status` before resuming".to_string())
            }
            Self::SessionConflict { .. } | Self::RunEnded { .. } => {
                Some("Use a new session id or omit it to generate one".to_string())
            }
            Self::InvalidConfig(_) => Some("Check the GRADER_* environment variables".to_string()),
            _ => None,
        };
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            details,
            recoverable: self.recoverable(),
            suggestion,
        }
    }
}

/// Structured, serializable view of a [`GradingError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}
