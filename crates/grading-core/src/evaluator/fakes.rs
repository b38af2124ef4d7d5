//! Deterministic evaluator for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Barrier, Notify, Semaphore};

use super::{
    CriterionPrompt, CriterionVerdict, Evaluator, EvaluatorError, FeedbackDraft, FeedbackPrompt,
};

#[derive(Debug, Clone)]
enum Script {
    Score { score: f64, notes: String },
    Fail(EvaluatorError),
    /// Never answers; only cancellation ends the call.
    Hang,
}

/// Evaluator that answers from a per-criterion script.
///
/// Criteria without a script fail terminally unless a default fraction of
/// `max_score` was configured. Call counters let tests assert how often the
/// pipeline reached the model.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    scripts: HashMap<String, Script>,
    default_fraction: Option<f64>,
    feedback: Result<FeedbackDraft, EvaluatorError>,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
    held: Option<Semaphore>,
    criterion_calls: AtomicUsize,
    feedback_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    call_started: Notify,
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_fraction: None,
            feedback: Ok(FeedbackDraft {
                strengths: vec!["Addresses the prompt directly".to_string()],
                areas_for_improvement: vec!["Support claims with more evidence".to_string()],
                suggestions: vec!["Add a concluding paragraph".to_string()],
                encouragement: "Keep going, the core ideas are there.".to_string(),
                overall_summary: "Solid effort overall.".to_string(),
            }),
            delay: None,
            barrier: None,
            held: None,
            criterion_calls: AtomicUsize::new(0),
            feedback_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            call_started: Notify::new(),
        }
    }

    /// Answer `criterion` with `score`.
    pub fn score(mut self, criterion: &str, score: f64, notes: &str) -> Self {
        self.scripts.insert(
            criterion.to_string(),
            Script::Score {
                score,
                notes: notes.to_string(),
            },
        );
        self
    }

    /// Fail `criterion` with `error`.
    pub fn fail(mut self, criterion: &str, error: EvaluatorError) -> Self {
        self.scripts
            .insert(criterion.to_string(), Script::Fail(error));
        self
    }

    /// Never answer `criterion`.
    pub fn hang(mut self, criterion: &str) -> Self {
        self.scripts.insert(criterion.to_string(), Script::Hang);
        self
    }

    /// Score unscripted criteria at `fraction * max_score`.
    pub fn with_default_fraction(mut self, fraction: f64) -> Self {
        self.default_fraction = Some(fraction);
        self
    }

    pub fn with_feedback(mut self, feedback: Result<FeedbackDraft, EvaluatorError>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Sleep this long inside every criterion call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every criterion call wait on a shared barrier of `parties`.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Hold every criterion call until [`ScriptedEvaluator::release`].
    pub fn held(mut self) -> Self {
        self.held = Some(Semaphore::new(0));
        self
    }

    /// Let held criterion calls proceed.
    pub fn release(&self) {
        if let Some(held) = &self.held {
            held.add_permits(1);
        }
    }

    pub fn criterion_calls(&self) -> usize {
        self.criterion_calls.load(Ordering::SeqCst)
    }

    pub fn feedback_calls(&self) -> usize {
        self.feedback_calls.load(Ordering::SeqCst)
    }

    /// Highest number of criterion calls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` criterion calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.call_started.notified();
            if self.criterion_calls() >= n {
                return;
            }
            notified.await;
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn score_criterion(
        &self,
        prompt: &CriterionPrompt,
    ) -> Result<CriterionVerdict, EvaluatorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.criterion_calls.fetch_add(1, Ordering::SeqCst);
        self.call_started.notify_waiters();

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(held) = &self.held {
            // Permits go back on drop, so one release frees every call.
            let _permit = held.acquire().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.scripts.get(&prompt.criterion_name) {
            Some(Script::Score { score, notes }) => Ok(CriterionVerdict {
                score: *score,
                notes: notes.clone(),
            }),
            Some(Script::Fail(err)) => Err(err.clone()),
            Some(Script::Hang) => std::future::pending().await,
            None => match self.default_fraction {
                Some(fraction) => Ok(CriterionVerdict {
                    score: fraction * prompt.max_score,
                    notes: "default score".to_string(),
                }),
                None => Err(EvaluatorError::Terminal(format!(
                    "no script for criterion {}",
                    prompt.criterion_name
                ))),
            },
        }
    }

    async fn compose_feedback(
        &self,
        _prompt: &FeedbackPrompt,
    ) -> Result<FeedbackDraft, EvaluatorError> {
        self.feedback_calls.fetch_add(1, Ordering::SeqCst);
        self.feedback.clone()
    }
}
