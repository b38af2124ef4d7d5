//! The language-model capability the pipeline grades with.
//!
//! The core never talks to a model directly. It hands an [`Evaluator`] one
//! prompt per criterion and one prompt for the final feedback. Retrying
//! transient failures is the evaluator's own business; whatever error it
//! finally returns is terminal for the run.

pub mod fakes;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AggregationResult, ApprovalDecision, Rubric};

/// Input for scoring one criterion.
#[derive(Debug, Clone)]
pub struct CriterionPrompt {
    pub criterion_name: String,
    pub description: String,
    pub max_score: f64,
    pub submission: Arc<str>,
}

/// Raw verdict for one criterion. The score is clamped by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub score: f64,
    #[serde(default)]
    pub notes: String,
}

/// Input for composing final feedback.
#[derive(Debug, Clone)]
pub struct FeedbackPrompt {
    pub rubric: Rubric,
    pub submission: Arc<str>,
    pub aggregation: AggregationResult,
    pub approval: Option<ApprovalDecision>,
}

/// Feedback text as proposed by the evaluator, before the grade line is enforced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackDraft {
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub suggestions: Vec<String>,
    pub encouragement: String,
    pub overall_summary: String,
}

/// Failures reported by an [`Evaluator`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluatorError {
    /// Temporary condition (rate limit, timeout, unavailable upstream).
    #[error("transient evaluator failure: {0}")]
    Transient(String),

    #[error("evaluator failure: {0}")]
    Terminal(String),

    #[error("unparsable evaluator response: {0}")]
    Unparsable(String),
}

impl EvaluatorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Model-backed grading capability.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Score `prompt.submission` against one criterion.
    async fn score_criterion(
        &self,
        prompt: &CriterionPrompt,
    ) -> Result<CriterionVerdict, EvaluatorError>;

    /// Compose structured feedback for a graded submission.
    async fn compose_feedback(&self, prompt: &FeedbackPrompt)
        -> Result<FeedbackDraft, EvaluatorError>;
}

#[async_trait]
impl<E: Evaluator + ?Sized> Evaluator for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn score_criterion(
        &self,
        prompt: &CriterionPrompt,
    ) -> Result<CriterionVerdict, EvaluatorError> {
        (**self).score_criterion(prompt).await
    }

    async fn compose_feedback(
        &self,
        prompt: &FeedbackPrompt,
    ) -> Result<FeedbackDraft, EvaluatorError> {
        (**self).compose_feedback(prompt).await
    }
}
