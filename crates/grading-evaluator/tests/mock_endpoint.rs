//! HttpEvaluator against a local mock of a chat-completions endpoint.

use std::sync::Arc;
use std::time::Duration;

use grading_core::{
    CriterionPrompt, Evaluator, EvaluatorError, GradingConfig, GradingError, PipelineOrchestrator,
    ReviewStatus,
};
use grading_evaluator::{HttpEvaluator, HttpEvaluatorConfig, RetryConfig, RetryingEvaluator};
use grading_state::MemorySessionStore;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn evaluator(server: &MockServer) -> HttpEvaluator {
    HttpEvaluator::new(
        HttpEvaluatorConfig::new(format!("{}/v1", server.uri()), "test-model")
            .with_api_key("sk-mock-key"),
    )
    .unwrap()
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test-001",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

fn prompt() -> CriterionPrompt {
    CriterionPrompt {
        criterion_name: "Clarity".to_string(),
        description: "Ideas are easy to follow".to_string(),
        max_score: 10.0,
        submission: Arc::from("A short, clear essay."),
    }
}

fn fast_retries() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        initial_delay: Duration::from_millis(10),
        exp_base: 2.0,
        max_delay: Duration::from_millis(50),
    }
}

// ── Single calls ──────────────────────────────────────────────────────

#[tokio::test]
async fn scores_criterion_from_json_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-mock-key"))
        .and(body_string_contains("json_object"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"score": 8, "notes": "clear structure"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let verdict = evaluator(&server).score_criterion(&prompt()).await.unwrap();
    assert_eq!(verdict.score, 8.0);
    assert_eq!(verdict.notes, "clear structure");
}

#[tokio::test]
async fn unavailable_upstream_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = evaluator(&server).score_criterion(&prompt()).await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn bad_request_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown model"))
        .mount(&server)
        .await;

    let err = evaluator(&server).score_criterion(&prompt()).await.unwrap_err();
    match err {
        EvaluatorError::Terminal(message) => assert!(message.contains("unknown model")),
        other => panic!("expected terminal error, got {other:?}"),
    }
}

#[tokio::test]
async fn prose_reply_is_unparsable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I'd say about eight.")),
        )
        .mount(&server)
        .await;

    let err = evaluator(&server).score_criterion(&prompt()).await.unwrap_err();
    assert!(matches!(err, EvaluatorError::Unparsable(_)));
}

#[tokio::test]
async fn empty_choices_are_unparsable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = evaluator(&server).score_criterion(&prompt()).await.unwrap_err();
    assert!(matches!(err, EvaluatorError::Unparsable(_)));
}

// ── Retries ───────────────────────────────────────────────────────────

#[tokio::test]
async fn retries_rate_limit_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"score": 6, "notes": "ok"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let retrying = RetryingEvaluator::new(evaluator(&server), fast_retries());
    let verdict = retrying.score_criterion(&prompt()).await.unwrap();
    assert_eq!(verdict.score, 6.0);
}

#[tokio::test]
async fn gives_up_after_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(504))
        .expect(3)
        .mount(&server)
        .await;

    let retrying = RetryingEvaluator::new(evaluator(&server), fast_retries());
    let err = retrying.score_criterion(&prompt()).await.unwrap_err();
    assert!(err.is_transient());
}

// ── Whole pipeline ────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_grades_through_http_evaluator() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("expert evaluator"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"score": 8, "notes": "clear structure"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("feedback specialist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"strengths": ["Clear"], "areas_for_improvement": [], "suggestions": [],
                "encouragement": "Keep writing.", "overall_summary": "Nicely done."}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let evaluator = Arc::new(RetryingEvaluator::new(evaluator(&server), fast_retries()));
    let orch = PipelineOrchestrator::new(
        GradingConfig::default(),
        evaluator,
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap();

    let rubric = json!({
        "name": "Short essay",
        "criteria": [
            { "name": "Clarity", "max_score": 10, "description": "Ideas are easy to follow" }
        ]
    });
    let outcome = orch
        .submit_for_grading(rubric, "A short, clear essay.", None)
        .await
        .unwrap();

    let report = outcome.report().expect("80% needs no approval");
    assert_eq!(report.review, ReviewStatus::NotRequired);
    assert_eq!(
        report.feedback.overall_summary,
        "Nicely done. Final grade: B (80.0%)."
    );
    assert_eq!(report.feedback.strengths, vec!["Clear".to_string()]);
}

#[tokio::test]
async fn pipeline_fails_when_retries_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let evaluator = Arc::new(RetryingEvaluator::new(evaluator(&server), fast_retries()));
    let orch = PipelineOrchestrator::new(
        GradingConfig::default(),
        evaluator,
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap();

    let rubric = json!({
        "name": "Short essay",
        "criteria": [
            { "name": "Clarity", "max_score": 10, "description": "Ideas are easy to follow" }
        ]
    });
    let err = orch
        .submit_for_grading(rubric, "A short, clear essay.", None)
        .await
        .unwrap_err();
    match err {
        GradingError::Evaluation { message, .. } => {
            assert!(message.ends_with("(retries exhausted)"), "{message}")
        }
        other => panic!("expected evaluation error, got {other:?}"),
    }
}
