//! OpenAI-compatible chat-completions evaluator.

use std::time::Duration;

use async_trait::async_trait;
use grading_core::{
    CriterionPrompt, CriterionVerdict, Evaluator, EvaluatorError, FeedbackDraft, FeedbackPrompt,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HttpEvaluatorError, Result};
use crate::prompt::{criterion_messages, feedback_messages, ChatMessage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Endpoint settings for [`HttpEvaluator`].
#[derive(Clone)]
pub struct HttpEvaluatorConfig {
    pub base_url: String,
    /// Sent as a bearer token when present. Local endpoints often need none.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for HttpEvaluatorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for HttpEvaluatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEvaluatorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpEvaluatorConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from environment variables.
    ///
    /// Reads:
    /// - GRADER_LLM_BASE_URL (default: OpenAI)
    /// - GRADER_LLM_API_KEY (required for the default endpoint)
    /// - GRADER_LLM_MODEL (default: gpt-4o-mini)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        if let Some(url) = non_empty("GRADER_LLM_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = non_empty("GRADER_LLM_MODEL") {
            config.model = model;
        }
        config.api_key = non_empty("GRADER_LLM_API_KEY");

        if config.api_key.is_none() && config.base_url == DEFAULT_BASE_URL {
            return Err(HttpEvaluatorError::NotConfigured(
                "set GRADER_LLM_API_KEY or point GRADER_LLM_BASE_URL at a local endpoint"
                    .to_string(),
            ));
        }
        Ok(config)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Body of a chat-completions request.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    pub temperature: f32,
}

impl ChatRequest {
    /// Request that forces a JSON-object reply.
    pub fn json(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`Evaluator`] backed by an OpenAI-compatible HTTP endpoint.
///
/// Each call is a single attempt. Wrap it in
/// [`RetryingEvaluator`](crate::RetryingEvaluator) to retry transient failures.
#[derive(Debug)]
pub struct HttpEvaluator {
    config: HttpEvaluatorConfig,
    http: reqwest::Client,
}

impl HttpEvaluator {
    pub fn new(config: HttpEvaluatorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("grading-evaluator/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpEvaluatorConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpEvaluatorConfig {
        &self.config
    }

    /// Send one request and decode the first choice as `T`.
    pub async fn complete_json<T: DeserializeOwned>(&self, request: &ChatRequest) -> Result<T> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let mut req = self.http.post(self.config.completions_url()).json(request);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = HttpEvaluatorError::Status {
                status: status.as_u16(),
                body,
            };
            warn!(
                status = status.as_u16(),
                transient = err.is_transient(),
                "chat completion rejected"
            );
            return Err(err);
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            HttpEvaluatorError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                HttpEvaluatorError::InvalidResponse("response has no content".to_string())
            })?;

        parse_content(&content)
    }
}

/// Decode model output, tolerating a surrounding markdown code fence.
pub fn parse_content<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(unfenced.trim())?)
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn score_criterion(
        &self,
        prompt: &CriterionPrompt,
    ) -> std::result::Result<CriterionVerdict, EvaluatorError> {
        let request = ChatRequest::json(&self.config.model, criterion_messages(prompt));
        Ok(self.complete_json(&request).await?)
    }

    async fn compose_feedback(
        &self,
        prompt: &FeedbackPrompt,
    ) -> std::result::Result<FeedbackDraft, EvaluatorError> {
        let request = ChatRequest::json(&self.config.model, feedback_messages(prompt));
        Ok(self.complete_json(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let config = HttpEvaluatorConfig::from_lookup(lookup(&[
            ("GRADER_LLM_BASE_URL", "http://localhost:11434/v1"),
            ("GRADER_LLM_API_KEY", "sk-test"),
            ("GRADER_LLM_MODEL", "llama3"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "llama3");
    }

    #[test]
    fn test_default_endpoint_needs_api_key() {
        let err = HttpEvaluatorConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, HttpEvaluatorError::NotConfigured(_)));
    }

    #[test]
    fn test_local_endpoint_without_key_is_fine() {
        let config = HttpEvaluatorConfig::from_lookup(lookup(&[(
            "GRADER_LLM_BASE_URL",
            "http://localhost:8080/v1",
        )]))
        .unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_completions_url_strips_trailing_slash() {
        let config = HttpEvaluatorConfig::new("http://localhost:8080/v1/", "m");
        assert_eq!(
            config.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = HttpEvaluatorConfig::default().with_api_key("sk-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_request_asks_for_json_object() {
        let request = ChatRequest::json("m", vec![ChatMessage::user("hi")]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["temperature"], 0.0);
    }

    #[test]
    fn test_parse_content_strips_code_fence() {
        let verdict: CriterionVerdict =
            parse_content("```json\n{\"score\": 42, \"notes\": \"ok\"}\n```").unwrap();
        assert_eq!(verdict.score, 42.0);
        assert_eq!(verdict.notes, "ok");
    }

    #[test]
    fn test_parse_content_rejects_prose() {
        let err = parse_content::<CriterionVerdict>("I would give this a 7.").unwrap_err();
        assert!(matches!(err, HttpEvaluatorError::Json(_)));
    }
}
