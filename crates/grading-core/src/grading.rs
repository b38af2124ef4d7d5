//! Parallel per-criterion grading.
//!
//! One task per criterion, bounded by a semaphore, joined in full. The
//! first terminal failure aborts the remaining tasks and the partial results
//! are discarded. A `true` on the cancel channel does the same and reports
//! [`GradingError::Cancelled`].

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::domain::{Criterion, CriterionResult, GradingError, GradingResult, Rubric};
use crate::evaluator::{CriterionPrompt, Evaluator, EvaluatorError};

/// Scores a single criterion through an [`Evaluator`].
pub struct CriterionEvaluator {
    evaluator: Arc<dyn Evaluator>,
}

impl CriterionEvaluator {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Score `criterion` against `submission`, clamping into `[0, max_score]`.
    pub async fn evaluate(
        &self,
        criterion: &Criterion,
        submission: Arc<str>,
    ) -> GradingResult<CriterionResult> {
        let prompt = CriterionPrompt {
            criterion_name: criterion.name.clone(),
            description: criterion.description.clone(),
            max_score: criterion.max_score,
            submission,
        };

        let verdict = self
            .evaluator
            .score_criterion(&prompt)
            .await
            .map_err(|e| evaluation_error(&criterion.name, e))?;

        if !verdict.score.is_finite() {
            return Err(evaluation_error(
                &criterion.name,
                EvaluatorError::Unparsable(format!(
                    "score is not a finite number: {}",
                    verdict.score
                )),
            ));
        }

        Ok(CriterionResult::clamped(criterion, verdict.score, verdict.notes))
    }
}

/// Map an evaluator failure that reached the core onto the run error.
pub(crate) fn evaluation_error(subject: &str, err: EvaluatorError) -> GradingError {
    let message = if err.is_transient() {
        format!("{err} (retries exhausted)")
    } else {
        err.to_string()
    };
    GradingError::Evaluation {
        subject: subject.to_string(),
        message,
    }
}

enum TaskOutcome {
    Graded(CriterionResult),
    Failed(GradingError),
    Cancelled,
}

/// Resolves once `true` is observed on the channel. Never resolves if the
/// sender is dropped without cancelling.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Grade every criterion of `rubric` concurrently.
///
/// Results come back in rubric order. At most `max_concurrent` evaluator
/// calls run at once.
#[instrument(skip_all, fields(session_id = %session_id, criteria = rubric.criteria.len()))]
pub async fn grade_all(
    session_id: &str,
    evaluator: Arc<dyn Evaluator>,
    rubric: &Rubric,
    submission: Arc<str>,
    max_concurrent: usize,
    cancel: watch::Receiver<bool>,
) -> GradingResult<Vec<CriterionResult>> {
    let grader = Arc::new(CriterionEvaluator::new(evaluator));
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for (index, criterion) in rubric.criteria.iter().cloned().enumerate() {
        let grader = Arc::clone(&grader);
        let sem = Arc::clone(&sem);
        let submission = Arc::clone(&submission);
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let work = async {
                let _permit = sem.acquire_owned().await.ok();
                grader.evaluate(&criterion, submission).await
            };
            let outcome = tokio::select! {
                biased;
                _ = cancelled(cancel) => TaskOutcome::Cancelled,
                res = work => match res {
                    Ok(result) => TaskOutcome::Graded(result),
                    Err(e) => TaskOutcome::Failed(e),
                },
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<CriterionResult>> = vec![None; rubric.criteria.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tasks.abort_all();
                return Err(GradingError::Evaluation {
                    subject: "grading task".to_string(),
                    message: e.to_string(),
                });
            }
        };
        match outcome {
            TaskOutcome::Graded(result) => {
                crate::obs::emit_criterion_graded(
                    session_id,
                    &result.criterion_name,
                    result.score,
                    result.max_score,
                );
                slots[index] = Some(result);
            }
            TaskOutcome::Failed(err) => {
                warn!(error = %err, "criterion grading failed, aborting remaining graders");
                tasks.abort_all();
                return Err(err);
            }
            TaskOutcome::Cancelled => {
                debug!("grading cancelled");
                tasks.abort_all();
                return Err(GradingError::Cancelled {
                    session_id: session_id.to_string(),
                });
            }
        }
    }

    // Every slot is filled: each task either graded or returned early above.
    slots
        .into_iter()
        .zip(&rubric.criteria)
        .map(|(slot, criterion)| {
            slot.ok_or_else(|| GradingError::Evaluation {
                subject: criterion.name.clone(),
                message: "grader produced no result".to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::fakes::ScriptedEvaluator;

    fn rubric(names: &[(&str, f64)]) -> Rubric {
        Rubric {
            name: "Essay".into(),
            criteria: names
                .iter()
                .map(|(n, max)| Criterion::new(*n, format!("{n} quality"), *max))
                .collect(),
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_results_follow_rubric_order() {
        let eval = Arc::new(
            ScriptedEvaluator::new()
                .score("Thesis", 40.0, "clear")
                .score("Evidence", 30.0, "thin")
                .score("Style", 9.0, "fine"),
        );
        let rubric = rubric(&[("Thesis", 50.0), ("Evidence", 40.0), ("Style", 10.0)]);

        let results = grade_all("s", eval, &rubric, Arc::from("essay"), 8, no_cancel())
            .await
            .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.criterion_name.as_str()).collect();
        assert_eq!(names, vec!["Thesis", "Evidence", "Style"]);
        assert_eq!(results[1].score, 30.0);
    }

    #[tokio::test]
    async fn test_scores_are_clamped() {
        let eval = Arc::new(
            ScriptedEvaluator::new()
                .score("Thesis", 75.0, "generous")
                .score("Style", -2.0, "harsh"),
        );
        let rubric = rubric(&[("Thesis", 50.0), ("Style", 10.0)]);
        let results = grade_all("s", eval, &rubric, Arc::from("essay"), 8, no_cancel())
            .await
            .unwrap();
        assert_eq!(results[0].score, 50.0);
        assert_eq!(results[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_non_finite_score_is_evaluation_error() {
        let eval = Arc::new(ScriptedEvaluator::new().score("Thesis", f64::NAN, ""));
        let rubric = rubric(&[("Thesis", 50.0)]);
        let err = grade_all("s", eval, &rubric, Arc::from("essay"), 8, no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, GradingError::Evaluation { ref subject, .. } if subject == "Thesis"));
    }

    #[tokio::test]
    async fn test_terminal_failure_fails_the_batch() {
        let eval = Arc::new(
            ScriptedEvaluator::new()
                .score("Thesis", 40.0, "")
                .fail("Style", EvaluatorError::Transient("HTTP 503".into())),
        );
        let rubric = rubric(&[("Thesis", 50.0), ("Style", 10.0)]);
        let err = grade_all("s", eval, &rubric, Arc::from("essay"), 8, no_cancel())
            .await
            .unwrap_err();
        match err {
            GradingError::Evaluation { subject, message } => {
                assert_eq!(subject, "Style");
                assert!(message.contains("retries exhausted"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let eval = Arc::new(
            ScriptedEvaluator::new()
                .with_default_fraction(1.0)
                .with_delay(std::time::Duration::from_millis(10)),
        );
        let rubric = rubric(&[("A", 1.0), ("B", 1.0), ("C", 1.0), ("D", 1.0)]);
        grade_all("s", eval.clone(), &rubric, Arc::from("x"), 2, no_cancel())
            .await
            .unwrap();
        assert!(eval.peak_in_flight() <= 2);
        assert_eq!(eval.criterion_calls(), 4);
    }
}
