//! Structured observability hooks for grading run lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via [`run_span`]
//! - Emission functions for lifecycle events: start, stage change, per-criterion
//!   grade, suspension, resume, finish and failure
//!
//! Events are emitted at `info!` level (failures at `warn!`/`error!`) and can be
//! filtered with `RUST_LOG`.

use tracing::{error, info, warn};

/// Span tagging everything inside it with the session id.
///
/// Attach to async work with `tracing::Instrument`:
///
/// ```ignore
/// orchestrate(run).instrument(run_span("grading_1a2b3c4d")).await
/// ```
pub fn run_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("grading.run", session_id = %session_id)
}

/// Emit event: run created for a rubric.
pub fn emit_run_started(session_id: &str, rubric_digest: &str) {
    info!(event = "run.started", session_id = %session_id, rubric_digest = %rubric_digest);
}

/// Emit event: run moved between stages.
pub fn emit_stage_changed(session_id: &str, from: &str, to: &str, revision: u64) {
    info!(
        event = "run.stage_changed",
        session_id = %session_id,
        from = %from,
        to = %to,
        revision = revision,
    );
}

/// Emit event: one criterion scored.
pub fn emit_criterion_graded(session_id: &str, criterion: &str, score: f64, max_score: f64) {
    info!(
        event = "criterion.graded",
        session_id = %session_id,
        criterion = %criterion,
        score = score,
        max_score = max_score,
    );
}

/// Emit event: run suspended at the approval gate.
pub fn emit_run_suspended(session_id: &str, percentage: f64, letter_grade: &str) {
    info!(
        event = "run.suspended",
        session_id = %session_id,
        percentage = percentage,
        letter_grade = %letter_grade,
    );
}

/// Emit event: reviewer decision applied (or replayed).
pub fn emit_run_resumed(session_id: &str, confirmed: bool, decided_by: &str, replayed: bool) {
    info!(
        event = "run.resumed",
        session_id = %session_id,
        confirmed = confirmed,
        decided_by = %decided_by,
        replayed = replayed,
    );
}

/// Emit event: run completed with its final grade.
pub fn emit_run_finished(session_id: &str, duration_ms: i64, percentage: f64, letter_grade: &str) {
    info!(
        event = "run.finished",
        session_id = %session_id,
        duration_ms = duration_ms,
        percentage = percentage,
        letter_grade = %letter_grade,
    );
}

/// Emit event: run ended early. Internal faults are logged at error level.
pub fn emit_run_failed(session_id: &str, kind: &str, error: &dyn std::fmt::Display, internal: bool) {
    if internal {
        error!(event = "run.failed", session_id = %session_id, kind = %kind, error = %error);
    } else {
        warn!(event = "run.failed", session_id = %session_id, kind = %kind, error = %error);
    }
}

/// Emit event: a state write failed while recording a failure (warning level).
pub fn emit_persist_error(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.persist_error", session_id = %session_id, error = %error);
}
