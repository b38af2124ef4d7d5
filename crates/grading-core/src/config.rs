//! Pipeline configuration.

use crate::domain::{GradingError, GradingResult};

/// Default lower approval threshold (percent).
pub const DEFAULT_FAILING_THRESHOLD: f64 = 50.0;
/// Default upper approval threshold (percent).
pub const DEFAULT_EXCEPTIONAL_THRESHOLD: f64 = 90.0;
pub const DEFAULT_MAX_CONCURRENT_GRADERS: usize = 8;
/// Longest accepted approval window: ten years.
pub const MAX_APPROVAL_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Tunables for the grading pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    /// Scores strictly below this percentage need human approval.
    pub failing_threshold: f64,
    /// Scores strictly above this percentage need human approval.
    pub exceptional_threshold: f64,
    /// How long a suspended run waits for a decision. `None` waits forever.
    pub approval_ttl_secs: Option<u64>,
    /// Upper bound on concurrent evaluator calls within one run.
    pub max_concurrent_graders: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            failing_threshold: DEFAULT_FAILING_THRESHOLD,
            exceptional_threshold: DEFAULT_EXCEPTIONAL_THRESHOLD,
            approval_ttl_secs: None,
            max_concurrent_graders: DEFAULT_MAX_CONCURRENT_GRADERS,
        }
    }
}

impl GradingConfig {
    pub fn with_thresholds(mut self, failing: f64, exceptional: f64) -> Self {
        self.failing_threshold = failing;
        self.exceptional_threshold = exceptional;
        self
    }

    pub fn with_approval_ttl_secs(mut self, ttl: Option<u64>) -> Self {
        self.approval_ttl_secs = ttl;
        self
    }

    pub fn with_max_concurrent_graders(mut self, n: usize) -> Self {
        self.max_concurrent_graders = n;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> GradingResult<()> {
        for (name, value) in [
            ("failing_threshold", self.failing_threshold),
            ("exceptional_threshold", self.exceptional_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(GradingError::InvalidConfig(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if self.failing_threshold > self.exceptional_threshold {
            return Err(GradingError::InvalidConfig(format!(
                "failing_threshold ({}) must not exceed exceptional_threshold ({})",
                self.failing_threshold, self.exceptional_threshold
            )));
        }
        if self.max_concurrent_graders == 0 {
            return Err(GradingError::InvalidConfig(
                "max_concurrent_graders must be at least 1".to_string(),
            ));
        }
        if let Some(ttl) = self.approval_ttl_secs.filter(|ttl| *ttl > MAX_APPROVAL_TTL_SECS) {
            return Err(GradingError::InvalidConfig(format!(
                "approval_ttl_secs must be at most {MAX_APPROVAL_TTL_SECS}, got {ttl}"
            )));
        }
        Ok(())
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads:
    /// - GRADER_FAILING_THRESHOLD (default: 50)
    /// - GRADER_EXCEPTIONAL_THRESHOLD (default: 90)
    /// - GRADER_APPROVAL_TTL_SECS (default: unset, no expiry)
    /// - GRADER_MAX_CONCURRENT (default: 8)
    pub fn from_env() -> GradingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GradingResult<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "GRADER_FAILING_THRESHOLD")? {
            config.failing_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_EXCEPTIONAL_THRESHOLD")? {
            config.exceptional_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_APPROVAL_TTL_SECS")? {
            config.approval_ttl_secs = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "GRADER_MAX_CONCURRENT")? {
            config.max_concurrent_graders = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> GradingResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GradingError::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
    }
}
