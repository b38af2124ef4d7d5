//! Pipeline run state.
//!
//! A [`PipelineRun`] is the typed record of one grading session. Only the
//! orchestrator mutates it, and every mutation goes through [`PipelineRun::advance`]
//! so stages are visited in their fixed order.

use chrono::{DateTime, Utc};
use grading_state::{ContentDigest, SessionId};
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, GradingError, GradingResult};
use super::feedback::{ApprovalDecision, FeedbackResult};
use super::grade::{AggregationResult, CriterionResult};
use super::rubric::Rubric;
use crate::approval::{ApprovalGate, GateState};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Grading,
    Aggregating,
    AwaitingApproval,
    GeneratingFeedback,
    Complete,
    Failed,
    Cancelled,
    Expired,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Validating,
        Stage::Grading,
        Stage::Aggregating,
        Stage::AwaitingApproval,
        Stage::GeneratingFeedback,
        Stage::Complete,
        Stage::Failed,
        Stage::Cancelled,
        Stage::Expired,
    ];

    /// Label used as the storage stage tag and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Grading => "grading",
            Self::Aggregating => "aggregating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::GeneratingFeedback => "generating_feedback",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Whether `next` directly follows `self` in the pipeline.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Validating, Grading) => true,
            (Grading, Aggregating) | (Grading, Cancelled) => true,
            (Aggregating, AwaitingApproval) | (Aggregating, GeneratingFeedback) => true,
            (AwaitingApproval, GeneratingFeedback) | (AwaitingApproval, Expired) => true,
            (GeneratingFeedback, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub at: DateTime<Utc>,
}

/// How the final grade was reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Score was inside the normal band; no review needed.
    NotRequired,
    Approved,
    /// Reviewer rejected the grade; feedback was still produced.
    NeedsReReview,
}

/// Final result handed back to callers for a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingReport {
    pub session_id: SessionId,
    pub rubric_name: String,
    pub aggregation: AggregationResult,
    pub review: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalDecision>,
    pub feedback: FeedbackResult,
    pub completed_at: DateTime<Utc>,
}

/// One grading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub session_id: SessionId,
    pub stage: Stage,
    /// Bumped on every persisted transition.
    pub revision: u64,
    /// Rubric document as submitted.
    pub rubric_source: serde_json::Value,
    /// Typed rubric, present once validation passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<Rubric>,
    pub submission: String,
    pub rubric_digest: ContentDigest,
    pub submission_digest: ContentDigest,
    /// In rubric order. Empty unless every criterion was graded.
    #[serde(default)]
    pub results: Vec<CriterionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<ApprovalGate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Start a new run in [`Stage::Validating`].
    pub fn new(
        session_id: SessionId,
        rubric_source: serde_json::Value,
        submission: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let submission = submission.into();
        Self {
            session_id,
            stage: Stage::Validating,
            revision: 0,
            rubric_digest: ContentDigest::from_json(&rubric_source),
            submission_digest: ContentDigest::from_bytes(submission.as_bytes()),
            rubric_source,
            rubric: None,
            submission,
            results: Vec::new(),
            aggregation: None,
            gate: None,
            feedback: None,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `next`, refusing transitions that skip or revisit stages.
    pub fn advance(&mut self, next: Stage, now: DateTime<Utc>) -> GradingResult<()> {
        if !self.stage.can_advance_to(next) {
            return Err(GradingError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.updated_at = now;
        if next == Stage::Complete {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// End the run because of `err`.
    ///
    /// Cancellation ends in [`Stage::Cancelled`], everything else in
    /// [`Stage::Failed`]. Partial criterion results are dropped.
    pub fn fail(&mut self, err: &GradingError, now: DateTime<Utc>) -> GradingResult<()> {
        let target = match err {
            GradingError::Cancelled { .. } => Stage::Cancelled,
            _ => Stage::Failed,
        };
        self.advance(target, now)?;
        self.results.clear();
        let report = err.report();
        self.failure = Some(FailureRecord {
            kind: report.kind,
            message: report.message,
            details: report.details,
            at: now,
        });
        Ok(())
    }

    /// Whether the run was created from exactly this rubric and submission.
    pub fn has_input(&self, rubric_digest: &ContentDigest, submission_digest: &ContentDigest) -> bool {
        &self.rubric_digest == rubric_digest && &self.submission_digest == submission_digest
    }

    /// Move an overdue suspended run to [`Stage::Expired`]. Returns whether it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.stage != Stage::AwaitingApproval {
            return false;
        }
        let Some(gate) = self.gate.as_mut() else {
            return false;
        };
        if !gate.expire_if_due(now) {
            return false;
        }
        self.stage = Stage::Expired;
        self.updated_at = now;
        true
    }

    /// The recorded reviewer decision, if the gate was resolved.
    pub fn approval(&self) -> Option<&ApprovalDecision> {
        self.gate.as_ref().and_then(|g| g.decision.as_ref())
    }

    /// Final report, available once the run is complete.
    pub fn report(&self) -> Option<GradingReport> {
        if self.stage != Stage::Complete {
            return None;
        }
        let review = match self.gate.as_ref().map(|g| g.state) {
            Some(GateState::Approved) => ReviewStatus::Approved,
            Some(GateState::Rejected) => ReviewStatus::NeedsReReview,
            _ => ReviewStatus::NotRequired,
        };
        Some(GradingReport {
            session_id: self.session_id.clone(),
            rubric_name: self.rubric.as_ref()?.name.clone(),
            aggregation: self.aggregation.clone()?,
            review,
            approval: self.approval().cloned(),
            feedback: self.feedback.clone()?,
            completed_at: self.completed_at.unwrap_or(self.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run() -> PipelineRun {
        PipelineRun::new(
            SessionId::parse("grading_0badf00d").unwrap(),
            json!({ "name": "Essay", "criteria": [] }),
            "My essay.",
            Utc::now(),
        )
    }

    #[test]
    fn test_stage_order_is_enforced() {
        let mut run = sample_run();
        let now = Utc::now();
        assert!(run.advance(Stage::Aggregating, now).is_err());
        run.advance(Stage::Grading, now).unwrap();
        run.advance(Stage::Aggregating, now).unwrap();
        run.advance(Stage::GeneratingFeedback, now).unwrap();
        run.advance(Stage::Complete, now).unwrap();
        assert!(run.completed_at.is_some());

        let err = run.advance(Stage::Failed, now).unwrap_err();
        assert!(matches!(
            err,
            GradingError::IllegalTransition {
                from: Stage::Complete,
                to: Stage::Failed
            }
        ));
    }

    #[test]
    fn test_cancel_only_from_grading() {
        assert!(Stage::Grading.can_advance_to(Stage::Cancelled));
        assert!(!Stage::Validating.can_advance_to(Stage::Cancelled));
        assert!(!Stage::AwaitingApproval.can_advance_to(Stage::Cancelled));
    }

    #[test]
    fn test_fail_records_failure_and_drops_results() {
        let mut run = sample_run();
        let now = Utc::now();
        run.advance(Stage::Grading, now).unwrap();
        run.results.push(CriterionResult {
            criterion_name: "Thesis".into(),
            score: 3.0,
            max_score: 5.0,
            notes: String::new(),
        });

        let err = GradingError::Evaluation {
            subject: "Evidence".into(),
            message: "model refused".into(),
        };
        run.fail(&err, now).unwrap();
        assert_eq!(run.stage, Stage::Failed);
        assert!(run.results.is_empty());
        assert_eq!(run.failure.as_ref().unwrap().kind, ErrorKind::Evaluation);
    }

    #[test]
    fn test_cancelled_error_ends_in_cancelled_stage() {
        let mut run = sample_run();
        let now = Utc::now();
        run.advance(Stage::Grading, now).unwrap();
        run.fail(
            &GradingError::Cancelled {
                session_id: run.session_id.to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(run.stage, Stage::Cancelled);
    }

    #[test]
    fn test_digests_identify_input() {
        let run = sample_run();
        let same_rubric = ContentDigest::from_json(&json!({ "criteria": [], "name": "Essay" }));
        let same_submission = ContentDigest::from_bytes(b"My essay.");
        assert!(run.has_input(&same_rubric, &same_submission));
        assert!(!run.has_input(&same_rubric, &ContentDigest::from_bytes(b"Other")));
    }

    #[test]
    fn test_stage_labels_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            assert_eq!(serde_json::to_value(stage).unwrap(), stage.as_str());
        }
        assert!("paused".parse::<Stage>().is_err());
    }

    #[test]
    fn test_report_absent_until_complete() {
        assert!(sample_run().report().is_none());
    }
}
