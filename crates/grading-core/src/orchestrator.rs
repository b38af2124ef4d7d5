//! Pipeline orchestration.
//!
//! [`PipelineOrchestrator`] sequences the stages of a grading run:
//!
//! ```text
//! Validating → Grading → Aggregating → [AwaitingApproval] → GeneratingFeedback → Complete
//!      └──────────┴──────────┴──────────────────┴─────────────────┴──────→ Failed
//! ```
//!
//! The run is persisted after every transition. A run that suspends at the
//! approval gate is fully described by its stored record, so it can be
//! resumed by any orchestrator sharing the same store, including one created
//! after a restart. Transitions on one session id are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use grading_state::{SessionId, SessionStore, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info, instrument, Instrument};

use crate::aggregator::ScoreAggregator;
use crate::approval::{
    ApprovalGate, ApprovalSummary, GateError, PendingApproval, Resolution,
};
use crate::config::GradingConfig;
use crate::domain::{
    ApprovalDecision, GradingError, GradingReport, GradingResult, PipelineRun, ResumeRejection,
    Stage,
};
use crate::evaluator::Evaluator;
use crate::feedback::FeedbackGenerator;
use crate::grading;
use crate::obs;
use crate::run_store::RunStore;
use crate::validator::{self, ValidationOk};

/// What a submit or resume call hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GradingOutcome {
    /// Suspended at the approval gate; resume with a decision.
    Pending {
        session_id: SessionId,
        approval: PendingApproval,
    },
    Complete {
        session_id: SessionId,
        report: GradingReport,
    },
}

impl GradingOutcome {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Pending { session_id, .. } | Self::Complete { session_id, .. } => session_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn pending(&self) -> Option<&PendingApproval> {
        match self {
            Self::Pending { approval, .. } => Some(approval),
            Self::Complete { .. } => None,
        }
    }

    pub fn report(&self) -> Option<&GradingReport> {
        match self {
            Self::Complete { report, .. } => Some(report),
            Self::Pending { .. } => None,
        }
    }
}

/// One async mutex per session id, dropped once nobody holds it.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Weak<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(session_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    map.insert(session_id.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

/// Drives grading runs from submission to final report.
pub struct PipelineOrchestrator {
    config: GradingConfig,
    evaluator: Arc<dyn Evaluator>,
    aggregator: ScoreAggregator,
    runs: RunStore,
    locks: SessionLocks,
    /// Cancel senders for runs currently in the grading stage.
    grading: Mutex<HashMap<SessionId, watch::Sender<bool>>>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator. Fails if `config` is inconsistent.
    pub fn new(
        config: GradingConfig,
        evaluator: Arc<dyn Evaluator>,
        store: Arc<dyn SessionStore>,
    ) -> GradingResult<Self> {
        config.validate()?;
        Ok(Self {
            aggregator: ScoreAggregator::new(&config),
            config,
            evaluator,
            runs: RunStore::new(store),
            locks: SessionLocks::default(),
            grading: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    /// Grade `submission` against `rubric`.
    ///
    /// Returns [`GradingOutcome::Pending`] when the grade needs human approval
    /// (the run is persisted before returning) and
    /// [`GradingOutcome::Complete`] otherwise.
    ///
    /// Re-submitting the same rubric and submission under an existing session
    /// id returns that run's current outcome instead of grading again. If that
    /// run already ended without a report the call fails with
    /// [`GradingError::RunEnded`]. Reusing a session id with a different
    /// rubric or submission is a [`GradingError::SessionConflict`].
    #[instrument(skip(self, rubric, submission, session_id), fields(session_id))]
    pub async fn submit_for_grading(
        &self,
        rubric: serde_json::Value,
        submission: &str,
        session_id: Option<SessionId>,
    ) -> GradingResult<GradingOutcome> {
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        tracing::Span::current().record("session_id", session_id.as_str());

        let _guard = self.locks.acquire(&session_id).await;
        let run = PipelineRun::new(session_id.clone(), rubric, submission, Utc::now());

        if let Some(existing) = self.runs.load(&session_id).await? {
            return self.resubmit(existing, &run).await;
        }

        obs::emit_run_started(session_id.as_str(), run.rubric_digest.short());
        self.drive(run)
            .instrument(obs::run_span(session_id.as_str()))
            .await
    }

    /// Apply a reviewer decision to a suspended run and finish it.
    ///
    /// Repeating the decision that was already applied returns the recorded
    /// result without generating feedback again. Anything else on a run that
    /// is not awaiting approval fails with [`GradingError::InvalidResume`] and
    /// leaves the stored run untouched.
    #[instrument(
        skip(self, session_id, decision),
        fields(session_id = %session_id, confirmed = decision.confirmed)
    )]
    pub async fn resume_grading(
        &self,
        session_id: &SessionId,
        decision: ApprovalDecision,
    ) -> GradingResult<GradingOutcome> {
        let _guard = self.locks.acquire(session_id).await;
        let invalid = |reason: ResumeRejection| GradingError::InvalidResume {
            session_id: session_id.to_string(),
            reason,
        };

        let Some(mut run) = self.runs.load(session_id).await? else {
            return Err(invalid(ResumeRejection::UnknownSession));
        };
        let now = Utc::now();
        self.expire_if_due(&mut run).await?;

        let stage = run.stage;
        match stage {
            Stage::AwaitingApproval | Stage::GeneratingFeedback | Stage::Complete => {}
            Stage::Expired => {
                let expired_at = run
                    .gate
                    .as_ref()
                    .and_then(|g| g.expires_at)
                    .unwrap_or(run.updated_at);
                return Err(invalid(ResumeRejection::Expired { expired_at }));
            }
            stage => return Err(invalid(ResumeRejection::NotAwaitingApproval { stage })),
        }
        let Some(gate) = run.gate.as_mut() else {
            return Err(invalid(ResumeRejection::NotAwaitingApproval { stage }));
        };

        let confirmed = decision.confirmed;
        let decided_by = decision.decided_by.clone();
        let resolution = gate.resolve(decision, now).map_err(|e| {
            invalid(match e {
                GateError::NotAwaiting(_) => ResumeRejection::NotAwaitingApproval { stage },
                GateError::AlreadyResolved { confirmed } => {
                    ResumeRejection::AlreadyResolved { confirmed }
                }
                GateError::Expired { expired_at } => ResumeRejection::Expired { expired_at },
            })
        })?;

        let span = obs::run_span(session_id.as_str());
        match resolution {
            Resolution::Applied(_) => {
                obs::emit_run_resumed(session_id.as_str(), confirmed, &decided_by, false);
                async {
                    self.transition(&mut run, Stage::GeneratingFeedback).await?;
                    self.finish(run).await
                }
                .instrument(span)
                .await
            }
            Resolution::Replayed(_) => {
                obs::emit_run_resumed(session_id.as_str(), confirmed, &decided_by, true);
                match stage {
                    Stage::Complete => Self::complete_outcome(&run),
                    // Decision was stored but feedback never finished.
                    Stage::GeneratingFeedback => self.finish(run).instrument(span).await,
                    stage => Err(invalid(ResumeRejection::NotAwaitingApproval { stage })),
                }
            }
        }
    }

    /// Current snapshot of a run.
    ///
    /// A suspended run past its approval deadline is moved to
    /// [`Stage::Expired`] (and persisted) before being returned.
    pub async fn get_run_status(&self, session_id: &SessionId) -> GradingResult<PipelineRun> {
        let run = self
            .runs
            .load(session_id)
            .await?
            .ok_or_else(|| not_found(session_id))?;

        let overdue = run
            .gate
            .as_ref()
            .is_some_and(|g| run.stage == Stage::AwaitingApproval && g.is_expired_at(Utc::now()));
        if !overdue {
            return Ok(run);
        }

        let _guard = self.locks.acquire(session_id).await;
        let mut run = self
            .runs
            .load(session_id)
            .await?
            .ok_or_else(|| not_found(session_id))?;
        self.expire_if_due(&mut run).await?;
        Ok(run)
    }

    /// Ask a run that is currently grading to stop.
    ///
    /// Outstanding criterion graders are abandoned, partial results are
    /// discarded and the run ends in [`Stage::Cancelled`]. Only runs grading
    /// in this orchestrator can be cancelled.
    pub async fn cancel_grading(&self, session_id: &SessionId) -> GradingResult<()> {
        {
            let grading = self.grading.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(tx) = grading.get(session_id) {
                tx.send_replace(true);
                info!(session_id = %session_id, "cancellation requested");
                return Ok(());
            }
        }

        let run = self
            .runs
            .load(session_id)
            .await?
            .ok_or_else(|| not_found(session_id))?;
        Err(GradingError::NotCancellable {
            session_id: session_id.to_string(),
            stage: run.stage,
        })
    }

    /// Persisted runs, optionally filtered by stage, most recently updated first.
    pub async fn list_runs(&self, stage: Option<Stage>) -> GradingResult<Vec<PipelineRun>> {
        self.runs.list(stage).await
    }

    /// Move every suspended run past its deadline to [`Stage::Expired`].
    ///
    /// Returns how many runs expired.
    pub async fn expire_overdue(&self) -> GradingResult<usize> {
        let now = Utc::now();
        let mut expired = 0;
        for run in self.runs.list(Some(Stage::AwaitingApproval)).await? {
            if !run.gate.as_ref().is_some_and(|g| g.is_expired_at(now)) {
                continue;
            }
            let _guard = self.locks.acquire(&run.session_id).await;
            if let Some(mut fresh) = self.runs.load(&run.session_id).await? {
                if self.expire_if_due(&mut fresh).await? {
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    // -- stages ---------------------------------------------------------------

    async fn drive(&self, mut run: PipelineRun) -> GradingResult<GradingOutcome> {
        self.runs.save(&mut run).await?;

        let validated = match validate_input(&run) {
            Ok(ok) => ok,
            Err(e) => return Err(self.fail(run, e).await),
        };
        debug!(message = %validated.message, "rubric accepted");
        let rubric = validated.rubric;
        run.rubric = Some(rubric.clone());
        self.transition(&mut run, Stage::Grading).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.grading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.session_id.clone(), cancel_tx);
        let graded = grading::grade_all(
            run.session_id.as_str(),
            Arc::clone(&self.evaluator),
            &rubric,
            Arc::from(run.submission.as_str()),
            self.config.max_concurrent_graders,
            cancel_rx,
        )
        .await;
        let cancel_requested = self
            .grading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run.session_id)
            .is_some_and(|tx| *tx.borrow());

        let results = match graded {
            Ok(_) if cancel_requested => {
                let err = GradingError::Cancelled {
                    session_id: run.session_id.to_string(),
                };
                return Err(self.fail(run, err).await);
            }
            Ok(results) => results,
            Err(e) => return Err(self.fail(run, e).await),
        };
        run.results = results;
        self.transition(&mut run, Stage::Aggregating).await?;

        let aggregation = match self.aggregator.aggregate(&run.results) {
            Ok(aggregation) => aggregation,
            Err(e) => return Err(self.fail(run, e).await),
        };
        let gate = match ApprovalGate::enter(&aggregation, self.config.approval_ttl_secs, Utc::now())
        {
            Ok(gate) => gate,
            Err(e) => return Err(self.fail(run, e).await),
        };
        let suspend = !gate.state.allows_feedback();
        run.aggregation = Some(aggregation);
        run.gate = Some(gate);

        if suspend {
            self.transition(&mut run, Stage::AwaitingApproval).await?;
            let approval = pending_handle(&run)?;
            obs::emit_run_suspended(
                run.session_id.as_str(),
                approval.summary.percentage,
                approval.summary.letter_grade.as_str(),
            );
            return Ok(GradingOutcome::Pending {
                session_id: run.session_id,
                approval,
            });
        }

        self.transition(&mut run, Stage::GeneratingFeedback).await?;
        self.finish(run).await
    }

    /// Generate feedback and complete a run sitting in `GeneratingFeedback`.
    async fn finish(&self, mut run: PipelineRun) -> GradingResult<GradingOutcome> {
        let (Some(rubric), Some(aggregation)) = (run.rubric.clone(), run.aggregation.clone())
        else {
            let err = GradingError::AggregationInvariant(
                "run reached feedback without a rubric and aggregation".to_string(),
            );
            return Err(self.fail(run, err).await);
        };

        let generator = FeedbackGenerator::new(Arc::clone(&self.evaluator));
        let generated = generator
            .generate(
                &rubric,
                Arc::from(run.submission.as_str()),
                &aggregation,
                run.approval(),
            )
            .await;
        let feedback = match generated {
            Ok(feedback) => feedback,
            Err(e) => return Err(self.fail(run, e).await),
        };
        run.feedback = Some(feedback);
        self.transition(&mut run, Stage::Complete).await?;

        obs::emit_run_finished(
            run.session_id.as_str(),
            (Utc::now() - run.created_at).num_milliseconds(),
            aggregation.percentage,
            aggregation.letter_grade.as_str(),
        );
        Self::complete_outcome(&run)
    }

    // -- helpers --------------------------------------------------------------

    /// Advance and persist.
    async fn transition(&self, run: &mut PipelineRun, next: Stage) -> GradingResult<()> {
        let from = run.stage;
        run.advance(next, Utc::now())?;
        self.runs.save(run).await?;
        obs::emit_stage_changed(run.session_id.as_str(), from.as_str(), next.as_str(), run.revision);
        Ok(())
    }

    /// Record `err` on the run, persist it, and hand the error back.
    async fn fail(&self, mut run: PipelineRun, err: GradingError) -> GradingError {
        let kind = err.kind();
        obs::emit_run_failed(run.session_id.as_str(), kind.as_str(), &err, kind.is_internal());

        let from = run.stage;
        match run.fail(&err, Utc::now()) {
            Ok(()) => match self.runs.save(&mut run).await {
                Ok(()) => obs::emit_stage_changed(
                    run.session_id.as_str(),
                    from.as_str(),
                    run.stage.as_str(),
                    run.revision,
                ),
                Err(persist) => obs::emit_persist_error(run.session_id.as_str(), &persist),
            },
            Err(transition) => obs::emit_persist_error(run.session_id.as_str(), &transition),
        }
        err
    }

    /// Persist expiry of an overdue suspended run. Returns whether it expired.
    async fn expire_if_due(&self, run: &mut PipelineRun) -> GradingResult<bool> {
        if !run.expire_if_due(Utc::now()) {
            return Ok(false);
        }
        self.runs.save(run).await?;
        obs::emit_stage_changed(
            run.session_id.as_str(),
            Stage::AwaitingApproval.as_str(),
            Stage::Expired.as_str(),
            run.revision,
        );
        Ok(true)
    }

    /// Answer a re-submission of an existing session id.
    async fn resubmit(
        &self,
        mut existing: PipelineRun,
        fresh: &PipelineRun,
    ) -> GradingResult<GradingOutcome> {
        if !existing.has_input(&fresh.rubric_digest, &fresh.submission_digest) {
            return Err(GradingError::SessionConflict {
                session_id: existing.session_id.to_string(),
            });
        }
        self.expire_if_due(&mut existing).await?;

        debug!(stage = %existing.stage, "re-submission of an existing run");
        match existing.stage {
            Stage::AwaitingApproval => Ok(GradingOutcome::Pending {
                approval: pending_handle(&existing)?,
                session_id: existing.session_id,
            }),
            Stage::Complete => Self::complete_outcome(&existing),
            stage => Err(GradingError::RunEnded {
                session_id: existing.session_id.to_string(),
                stage,
                failure: existing.failure.map(Box::new),
            }),
        }
    }

    fn complete_outcome(run: &PipelineRun) -> GradingResult<GradingOutcome> {
        let report = run.report().ok_or_else(|| {
            GradingError::AggregationInvariant(format!(
                "completed run {} is missing its report",
                run.session_id
            ))
        })?;
        Ok(GradingOutcome::Complete {
            session_id: run.session_id.clone(),
            report,
        })
    }
}

fn not_found(session_id: &SessionId) -> GradingError {
    StorageError::SessionNotFound {
        session_id: session_id.to_string(),
    }
    .into()
}

/// Validate the rubric and require a non-blank submission.
fn validate_input(run: &PipelineRun) -> GradingResult<ValidationOk> {
    let rubric = validator::validate(&run.rubric_source);
    if !run.submission.trim().is_empty() {
        return rubric;
    }
    let mut errors = match rubric {
        Ok(_) => Vec::new(),
        Err(GradingError::Validation { errors }) => errors,
        Err(other) => return Err(other),
    };
    errors.push("Submission cannot be empty".to_string());
    Err(GradingError::Validation { errors })
}

/// Pending handle for a run suspended at the gate.
fn pending_handle(run: &PipelineRun) -> GradingResult<PendingApproval> {
    let gate = run.gate.as_ref();
    let summary = match (gate.and_then(|g| g.summary.clone()), run.aggregation.as_ref()) {
        (Some(summary), _) => summary,
        (None, Some(aggregation)) => ApprovalSummary::from_aggregation(aggregation),
        (None, None) => {
            return Err(GradingError::AggregationInvariant(format!(
                "suspended run {} has no aggregation",
                run.session_id
            )))
        }
    };
    Ok(PendingApproval::new(
        run.session_id.clone(),
        summary,
        gate.and_then(|g| g.expires_at),
    ))
}
