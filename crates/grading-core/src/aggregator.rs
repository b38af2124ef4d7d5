//! Score aggregation and grade classification.

use crate::config::GradingConfig;
use crate::domain::{AggregationResult, CriterionResult, GradingError, GradingResult, LetterGrade};

/// Folds criterion results into a single grade.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    failing_threshold: f64,
    exceptional_threshold: f64,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new(&GradingConfig::default())
    }
}

impl ScoreAggregator {
    pub fn new(config: &GradingConfig) -> Self {
        Self {
            failing_threshold: config.failing_threshold,
            exceptional_threshold: config.exceptional_threshold,
        }
    }

    /// Aggregate `results` into totals, a letter grade and the approval flag.
    ///
    /// Approval is required strictly below the failing threshold or strictly
    /// above the exceptional one; the thresholds themselves pass.
    pub fn aggregate(&self, results: &[CriterionResult]) -> GradingResult<AggregationResult> {
        if results.is_empty() {
            return Err(GradingError::AggregationInvariant(
                "no criterion results to aggregate".to_string(),
            ));
        }
        for r in results {
            if !(r.max_score > 0.0) {
                return Err(GradingError::AggregationInvariant(format!(
                    "criterion '{}' has non-positive max_score {}",
                    r.criterion_name, r.max_score
                )));
            }
            if !(0.0..=r.max_score).contains(&r.score) {
                return Err(GradingError::AggregationInvariant(format!(
                    "criterion '{}' score {} outside [0, {}]",
                    r.criterion_name, r.score, r.max_score
                )));
            }
        }

        let total_score: f64 = results.iter().map(|r| r.score).sum();
        let max_possible: f64 = results.iter().map(|r| r.max_score).sum();
        let percentage = if max_possible > 0.0 {
            total_score * 100.0 / max_possible
        } else {
            0.0
        };
        let letter_grade = LetterGrade::from_percentage(percentage);

        let approval_reason = if percentage < self.failing_threshold {
            Some(format!(
                "Score below {}% - please verify before finalizing",
                self.failing_threshold
            ))
        } else if percentage > self.exceptional_threshold {
            Some(format!(
                "Score above {}% - please verify exceptional grade",
                self.exceptional_threshold
            ))
        } else {
            None
        };

        Ok(AggregationResult {
            total_score,
            max_possible,
            percentage,
            letter_grade,
            details: results.to_vec(),
            requires_approval: approval_reason.is_some(),
            approval_reason,
        })
    }
}
