//! Exponential backoff around any [`Evaluator`].
//!
//! Only [`EvaluatorError::Transient`] failures are retried. Once the attempt
//! budget is spent the last transient error is returned unchanged, and the
//! pipeline reports it as an evaluation failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use grading_core::{
    CriterionPrompt, CriterionVerdict, Evaluator, EvaluatorError, FeedbackDraft, FeedbackPrompt,
};
use tracing::{debug, warn};

/// Backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 5).
    pub attempts: u32,
    /// Delay before the first retry (default: 1 second).
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays (default: 7).
    pub exp_base: f64,
    /// Upper bound on a single delay (default: 60 seconds).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            exp_base: 7.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }
}

/// Delay before retry number `retry` (0-indexed):
/// `min(initial_delay * exp_base^retry, max_delay)`.
pub fn compute_delay(config: &RetryConfig, retry: u32) -> Duration {
    let factor = config.exp_base.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        config.max_delay
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Evaluator wrapper that retries transient failures with exponential backoff.
#[derive(Debug)]
pub struct RetryingEvaluator<E> {
    inner: E,
    config: RetryConfig,
}

impl<E: Evaluator> RetryingEvaluator<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, EvaluatorError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, EvaluatorError>> + Send,
    {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            evaluator = %self.inner.name(),
                            operation,
                            attempt,
                            "call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = compute_delay(&self.config, attempt - 1);
                    warn!(
                        evaluator = %self.inner.name(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<E: Evaluator> Evaluator for RetryingEvaluator<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn score_criterion(
        &self,
        prompt: &CriterionPrompt,
    ) -> Result<CriterionVerdict, EvaluatorError> {
        self.with_retries("score_criterion", || self.inner.score_criterion(prompt))
            .await
    }

    async fn compose_feedback(
        &self,
        prompt: &FeedbackPrompt,
    ) -> Result<FeedbackDraft, EvaluatorError> {
        self.with_retries("compose_feedback", || self.inner.compose_feedback(prompt))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a fixed sequence of answers, then keeps repeating the last one.
    struct Flaky {
        answers: Mutex<VecDeque<Result<CriterionVerdict, EvaluatorError>>>,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(answers: Vec<Result<CriterionVerdict, EvaluatorError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Evaluator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn score_criterion(
            &self,
            _prompt: &CriterionPrompt,
        ) -> Result<CriterionVerdict, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            }
        }

        async fn compose_feedback(
            &self,
            _prompt: &FeedbackPrompt,
        ) -> Result<FeedbackDraft, EvaluatorError> {
            Err(EvaluatorError::Terminal("not scripted".into()))
        }
    }

    fn prompt() -> CriterionPrompt {
        CriterionPrompt {
            criterion_name: "Thesis".to_string(),
            description: "Clear, arguable claim".to_string(),
            max_score: 50.0,
            submission: Arc::from("An essay."),
        }
    }

    fn verdict() -> CriterionVerdict {
        CriterionVerdict {
            score: 41.0,
            notes: "clear".to_string(),
        }
    }

    fn rate_limited() -> EvaluatorError {
        EvaluatorError::Transient("HTTP 429: slow down".into())
    }

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.exp_base, 7.0);
    }

    #[test]
    fn test_delay_grows_by_exp_base_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(compute_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(compute_delay(&config, 1), Duration::from_secs(7));
        assert_eq!(compute_delay(&config, 2), Duration::from_secs(49));
        assert_eq!(compute_delay(&config, 3), Duration::from_secs(60));
        assert_eq!(compute_delay(&config, 400), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let flaky = Arc::new(Flaky::new(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Ok(verdict()),
        ]));
        let retrying = RetryingEvaluator::new(flaky.clone(), RetryConfig::default());

        let started = tokio::time::Instant::now();
        let got = retrying.score_criterion(&prompt()).await.unwrap();

        assert_eq!(got, verdict());
        assert_eq!(flaky.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let flaky = Arc::new(Flaky::new(vec![Err(EvaluatorError::Terminal(
            "HTTP 401: bad key".into(),
        ))]));
        let retrying = RetryingEvaluator::new(flaky.clone(), RetryConfig::default());

        let err = retrying.score_criterion(&prompt()).await.unwrap_err();
        assert!(matches!(err, EvaluatorError::Terminal(_)));
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_transient_error() {
        let flaky = Arc::new(Flaky::new(vec![Err(rate_limited())]));
        let retrying = RetryingEvaluator::new(flaky.clone(), RetryConfig::default());

        let err = retrying.score_criterion(&prompt()).await.unwrap_err();
        assert_eq!(err, rate_limited());
        assert_eq!(flaky.calls(), 5);
    }

    #[tokio::test]
    async fn test_single_attempt_never_sleeps() {
        let flaky = Arc::new(Flaky::new(vec![Err(rate_limited())]));
        let retrying = RetryingEvaluator::new(flaky.clone(), RetryConfig::single_attempt());

        assert!(retrying.score_criterion(&prompt()).await.is_err());
        assert_eq!(flaky.calls(), 1);
    }
}
