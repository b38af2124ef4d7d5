//! Grading Evaluator: model access for the grading pipeline
//!
//! [`HttpEvaluator`] implements [`grading_core::Evaluator`] against any
//! OpenAI-compatible chat-completions endpoint. [`RetryingEvaluator`] adds the
//! backoff policy for transient failures (rate limits, timeouts, 5xx).
//!
//! ```rust,ignore
//! use grading_evaluator::{HttpEvaluator, RetryConfig, RetryingEvaluator};
//!
//! let evaluator = RetryingEvaluator::new(HttpEvaluator::from_env()?, RetryConfig::default());
//! ```

pub mod error;
pub mod http;
pub mod prompt;
pub mod retry;

pub use error::{HttpEvaluatorError, Result, RETRYABLE_STATUSES};
pub use http::{HttpEvaluator, HttpEvaluatorConfig};
pub use retry::{compute_delay, RetryConfig, RetryingEvaluator};
