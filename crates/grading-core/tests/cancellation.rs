//! Cancelling runs while criteria are being graded.

use std::sync::Arc;
use std::time::Duration;

use grading_core::evaluator::fakes::ScriptedEvaluator;
use grading_core::{
    ErrorKind, EvaluatorError, GradingConfig, GradingError, PipelineOrchestrator, SessionId, Stage,
};
use grading_state::{MemorySessionStore, StorageError};
use serde_json::{json, Value};

fn rubric() -> Value {
    json!({
        "name": "Argumentative essay",
        "criteria": [
            { "name": "Thesis", "max_score": 50, "description": "Clear, arguable claim" },
            { "name": "Evidence", "max_score": 50, "description": "Claim is supported" }
        ]
    })
}

fn setup(eval: ScriptedEvaluator) -> (Arc<PipelineOrchestrator>, Arc<ScriptedEvaluator>) {
    let eval = Arc::new(eval);
    let orch = PipelineOrchestrator::new(
        GradingConfig::default(),
        eval.clone(),
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap();
    (Arc::new(orch), eval)
}

#[tokio::test]
async fn cancel_during_grading_ends_run_as_cancelled() {
    let (orch, eval) = setup(
        ScriptedEvaluator::new()
            .score("Thesis", 40.0, "fine")
            .hang("Evidence"),
    );
    let id = SessionId::parse("grading_cancel01").unwrap();

    let submit = {
        let orch = Arc::clone(&orch);
        let id = id.clone();
        tokio::spawn(async move { orch.submit_for_grading(rubric(), "An essay.", Some(id)).await })
    };

    tokio::time::timeout(Duration::from_secs(5), eval.wait_for_calls(2))
        .await
        .expect("graders never started");
    orch.cancel_grading(&id).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), submit)
        .await
        .expect("cancelled run did not stop")
        .unwrap();
    assert!(matches!(result, Err(GradingError::Cancelled { .. })));

    let run = orch.get_run_status(&id).await.unwrap();
    assert_eq!(run.stage, Stage::Cancelled);
    assert!(run.results.is_empty());
    assert_eq!(run.failure.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(eval.feedback_calls(), 0);
}

#[tokio::test]
async fn terminal_failure_abandons_hanging_siblings() {
    let (orch, _eval) = setup(
        ScriptedEvaluator::new()
            .hang("Thesis")
            .fail("Evidence", EvaluatorError::Unparsable("not JSON".into())),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orch.submit_for_grading(rubric(), "An essay.", None),
    )
    .await
    .expect("failure did not abort the remaining graders");
    assert!(matches!(result, Err(GradingError::Evaluation { .. })));
}

#[tokio::test]
async fn finished_run_cannot_be_cancelled() {
    let (orch, _eval) = setup(
        ScriptedEvaluator::new()
            .score("Thesis", 38.0, "")
            .score("Evidence", 37.0, ""),
    );
    let id = SessionId::parse("grading_cancel02").unwrap();
    orch.submit_for_grading(rubric(), "An essay.", Some(id.clone()))
        .await
        .unwrap();

    let err = orch.cancel_grading(&id).await.unwrap_err();
    assert!(matches!(
        err,
        GradingError::NotCancellable {
            stage: Stage::Complete,
            ..
        }
    ));
    assert_eq!(orch.get_run_status(&id).await.unwrap().stage, Stage::Complete);
}

#[tokio::test]
async fn unknown_run_cannot_be_cancelled() {
    let (orch, _eval) = setup(ScriptedEvaluator::new());
    let err = orch
        .cancel_grading(&SessionId::parse("grading_nothere0").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GradingError::Storage(StorageError::SessionNotFound { .. })
    ));
}
