//! What a reviewer sees when a grade is held for approval.

use chrono::{DateTime, Utc};
use grading_state::SessionId;
use serde::{Deserialize, Serialize};

use crate::domain::{AggregationResult, LetterGrade};

/// One line of the per-criterion breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionLine {
    pub name: String,
    pub score: f64,
    pub max_score: f64,
}

/// Snapshot of the grade under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub final_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub reason: String,
    pub criteria: Vec<CriterionLine>,
}

impl ApprovalSummary {
    pub fn from_aggregation(aggregation: &AggregationResult) -> Self {
        Self {
            final_score: aggregation.total_score,
            max_score: aggregation.max_possible,
            percentage: aggregation.percentage,
            letter_grade: aggregation.letter_grade,
            reason: aggregation.approval_reason.clone().unwrap_or_default(),
            criteria: aggregation
                .details
                .iter()
                .map(|r| CriterionLine {
                    name: r.criterion_name.clone(),
                    score: r.score,
                    max_score: r.max_score,
                })
                .collect(),
        }
    }

    /// Plain-text prompt for a human reviewer.
    pub fn render_hint(&self) -> String {
        let mut out = String::from("GRADE APPROVAL REQUIRED\n\n");
        out.push_str(&format!(
            "Final Score: {}/{} ({:.1}%) - Grade: {}\n\n",
            self.final_score, self.max_score, self.percentage, self.letter_grade
        ));
        out.push_str(&format!("Reason: {}\n\nGrade Summary:\n", self.reason));
        for line in &self.criteria {
            out.push_str(&format!("- {}: {}/{}\n", line.name, line.score, line.max_score));
        }
        out.push_str("\nDo you approve this grade?");
        out
    }
}

/// Handle returned to the caller when a run suspends at the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub session_id: SessionId,
    pub summary: ApprovalSummary,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PendingApproval {
    pub fn new(
        session_id: SessionId,
        summary: ApprovalSummary,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            session_id,
            hint: summary.render_hint(),
            summary,
            expires_at,
        }
    }
}
