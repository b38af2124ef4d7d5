//! Error types for the HTTP evaluator

use grading_core::EvaluatorError;
use thiserror::Error;

/// HTTP statuses worth retrying.
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 500, 503, 504];

/// Errors raised while talking to a chat-completions endpoint
#[derive(Error, Debug)]
pub enum HttpEvaluatorError {
    /// Required setting missing or malformed
    #[error("evaluator not configured: {0}")]
    NotConfigured(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HttpEvaluatorError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HttpEvaluatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpEvaluatorError::Timeout(err.to_string())
        } else if err.is_connect() {
            HttpEvaluatorError::Connect(err.to_string())
        } else {
            HttpEvaluatorError::Http(err.to_string())
        }
    }
}

impl From<HttpEvaluatorError> for EvaluatorError {
    fn from(err: HttpEvaluatorError) -> Self {
        if err.is_transient() {
            return EvaluatorError::Transient(err.to_string());
        }
        match err {
            HttpEvaluatorError::InvalidResponse(_) | HttpEvaluatorError::Json(_) => {
                EvaluatorError::Unparsable(err.to_string())
            }
            other => EvaluatorError::Terminal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpEvaluatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> HttpEvaluatorError {
        HttpEvaluatorError::Status {
            status: code,
            body: "upstream says no".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses_are_transient() {
        for code in RETRYABLE_STATUSES {
            assert!(status(code).is_transient(), "{code} should be transient");
        }
    }

    #[test]
    fn test_other_statuses_are_terminal() {
        for code in [400, 401, 403, 404, 422, 502] {
            let err: EvaluatorError = status(code).into();
            assert!(matches!(err, EvaluatorError::Terminal(_)), "{code}");
        }
    }

    #[test]
    fn test_transport_failures_are_transient() {
        let err: EvaluatorError = HttpEvaluatorError::Timeout("60s elapsed".into()).into();
        assert!(err.is_transient());
        let err: EvaluatorError = HttpEvaluatorError::Connect("refused".into()).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_bodies_are_unparsable() {
        let err: EvaluatorError = HttpEvaluatorError::InvalidResponse("no choices".into()).into();
        assert!(matches!(err, EvaluatorError::Unparsable(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: EvaluatorError = HttpEvaluatorError::from(json_err).into();
        assert!(matches!(err, EvaluatorError::Unparsable(_)));
    }

    #[test]
    fn test_status_display_carries_body() {
        assert_eq!(status(503).to_string(), "HTTP 503: upstream says no");
    }
}
