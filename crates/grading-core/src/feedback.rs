//! Final feedback generation.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{AggregationResult, ApprovalDecision, FeedbackResult, GradingResult, Rubric};
use crate::evaluator::{Evaluator, FeedbackPrompt};
use crate::grading::evaluation_error;

/// Produces structured feedback once the approval gate has cleared.
pub struct FeedbackGenerator {
    evaluator: Arc<dyn Evaluator>,
}

impl FeedbackGenerator {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Ask the evaluator for feedback and pin the grade into the summary.
    ///
    /// The summary always ends with `Final grade: <letter> (<pct>%).` built
    /// from `aggregation`, whatever the evaluator wrote. A rejected grade
    /// additionally names the reviewer and flags the grade for re-review.
    pub async fn generate(
        &self,
        rubric: &Rubric,
        submission: Arc<str>,
        aggregation: &AggregationResult,
        approval: Option<&ApprovalDecision>,
    ) -> GradingResult<FeedbackResult> {
        let prompt = FeedbackPrompt {
            rubric: rubric.clone(),
            submission,
            aggregation: aggregation.clone(),
            approval: approval.cloned(),
        };
        let draft = self
            .evaluator
            .compose_feedback(&prompt)
            .await
            .map_err(|e| evaluation_error("feedback", e))?;
        debug!(evaluator = self.evaluator.name(), "feedback drafted");

        Ok(FeedbackResult {
            strengths: draft.strengths,
            areas_for_improvement: draft.areas_for_improvement,
            suggestions: draft.suggestions,
            encouragement: draft.encouragement,
            overall_summary: compose_summary(&draft.overall_summary, aggregation, approval),
        })
    }
}

fn compose_summary(
    drafted: &str,
    aggregation: &AggregationResult,
    approval: Option<&ApprovalDecision>,
) -> String {
    let mut parts = Vec::new();
    let drafted = drafted.trim();
    if !drafted.is_empty() {
        parts.push(drafted.to_string());
    }
    parts.push(format!("Final grade: {}.", aggregation.grade_line()));
    if let Some(decision) = approval.filter(|d| !d.confirmed) {
        parts.push(format!(
            "Grade rejected by {}; needs re-review.",
            decision.decided_by
        ));
    }
    parts.join(" ")
}
