//! Approval decisions and final feedback records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reviewer's verdict on a suspended grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub confirmed: bool,
    pub decided_by: String,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(confirmed: bool, decided_by: impl Into<String>) -> Self {
        Self {
            confirmed,
            decided_by: decided_by.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn approve(decided_by: impl Into<String>) -> Self {
        Self::new(true, decided_by)
    }

    pub fn reject(decided_by: impl Into<String>) -> Self {
        Self::new(false, decided_by)
    }
}

/// Structured feedback released once the approval gate clears.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub suggestions: Vec<String>,
    pub encouragement: String,
    /// Always carries the letter grade and percentage of the aggregation.
    pub overall_summary: String,
}
