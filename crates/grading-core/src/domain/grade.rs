//! Per-criterion results, letter grades and the aggregated score.

use serde::{Deserialize, Serialize};

use super::rubric::Criterion;

/// Score awarded for one criterion in one run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_name: String,
    /// Always within `[0, max_score]`.
    pub score: f64,
    pub max_score: f64,
    /// Justification from the evaluator.
    pub notes: String,
}

impl CriterionResult {
    /// Build a result for `criterion`, clamping `raw_score` into `[0, max_score]`.
    ///
    /// The caller must reject non-finite scores before calling this.
    pub fn clamped(criterion: &Criterion, raw_score: f64, notes: impl Into<String>) -> Self {
        Self {
            criterion_name: criterion.name.clone(),
            score: raw_score.clamp(0.0, criterion.max_score),
            max_score: criterion.max_score,
            notes: notes.into(),
        }
    }
}

/// Letter grade band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    /// Classify a percentage. Bands are checked high to low; first match wins.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            Self::A
        } else if percentage >= 80.0 {
            Self::B
        } else if percentage >= 70.0 {
            Self::C
        } else if percentage >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

impl std::fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the aggregation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub total_score: f64,
    pub max_possible: f64,
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub details: Vec<CriterionResult>,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
}

impl AggregationResult {
    /// `"<letter> (<percentage>%)"` with the stored percentage unrounded,
    /// e.g. `B (85.0%)` or `A (93.33333333333333%)`.
    pub fn grade_line(&self) -> String {
        format!("{} ({:?}%)", self.letter_grade, self.percentage)
    }
}
