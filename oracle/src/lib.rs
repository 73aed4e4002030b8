//! Minimal client for a narrative-generation oracle.
//!
//! The oracle is any chat-completions compatible endpoint that is asked to
//! answer with a single JSON document. This crate only moves bytes:
//! - builds the request (system prompt + one user message)
//! - applies a hard timeout around the whole round-trip
//! - returns the raw text plus usage, and offers [`extract_json`] to peel
//!   fenced or prose-wrapped JSON out of it
//!
//! Interpreting the JSON is the caller's job.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_PRIMARY_MODEL: &str = "gpt-4o";
const DEFAULT_FALLBACK_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_LOG_PREVIEW_CHARS: usize = 400;

/// Errors that can occur when calling the oracle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Oracle call timed out after {0:?}")]
    Timeout(Duration),
}

/// Which model bucket a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// The strong, expensive model used for narration.
    Primary,
    /// The cheap model used for classification and checks.
    Fallback,
}

/// Oracle client.
#[derive(Clone)]
pub struct OracleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    primary_model: String,
    fallback_model: String,
    timeout: Duration,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("base_url", &self.base_url)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OracleClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Create a client from the NARRATOR_ORACLE_API_KEY environment variable.
    ///
    /// NARRATOR_ORACLE_URL overrides the endpoint base when set.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("NARRATOR_ORACLE_API_KEY").map_err(|_| Error::NoApiKey)?;
        let mut client = Self::new(api_key)?;
        if let Ok(url) = std::env::var("NARRATOR_ORACLE_URL") {
            client = client.with_base_url(url);
        }
        Ok(client)
    }

    /// Set the endpoint base URL (without the `/chat/completions` suffix).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model used for [`ModelTier::Primary`] requests.
    pub fn with_primary_model(mut self, model: impl Into<String>) -> Self {
        self.primary_model = model.into();
        self
    }

    /// Set the model used for [`ModelTier::Fallback`] requests.
    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    /// Set the hard timeout applied to each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The model name a tier resolves to.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Fallback => &self.fallback_model,
        }
    }

    /// Send a request and return the oracle's raw text answer.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn send(&self, request: Request) -> Result<Response, Error> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model_for(request.tier).to_string());
        let api_request = ApiRequest {
            model: model.clone(),
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: request.system,
                },
                ApiMessage {
                    role: "user",
                    content: request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ApiResponseFormat {
                r#type: "json_object",
            }),
        };

        debug!(model = %model, tier = ?request.tier, "oracle request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.build_headers()?)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Parse("response has no message content".to_string()))?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(output = %preview(&text, MAX_LOG_PREVIEW_CHARS), "oracle raw output");
        }

        Ok(Response {
            model: api_response.model.unwrap_or(model),
            text,
            usage: api_response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A single oracle request: one system prompt, one user document.
#[derive(Debug, Clone)]
pub struct Request {
    pub tier: ModelTier,
    pub model: Option<String>,
    pub system: String,
    pub user: String,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub json_mode: bool,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a JSON-mode request for the given tier.
    pub fn new(tier: ModelTier, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            tier,
            model: None,
            system: system.into(),
            user: user.into(),
            max_tokens: 1200,
            temperature: None,
            json_mode: true,
            timeout: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow free-form text instead of forcing a JSON object.
    pub fn without_json_mode(mut self) -> Self {
        self.json_mode = false;
        self
    }
}

/// The oracle's answer.
#[derive(Debug, Clone)]
pub struct Response {
    pub model: String,
    pub text: String,
    pub usage: Option<Usage>,
}

impl Response {
    /// Parse the answer as JSON, tolerating markdown fences around it.
    pub fn json(&self) -> Result<serde_json::Value, Error> {
        let body = extract_json(&self.text);
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("{e}: {}", preview(body, 120))))
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Extract JSON from text that might wrap it in markdown or prose.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Prose around a bare object: keep the outermost braces.
    if !text.starts_with('{') {
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                return &text[start..=end];
            }
        }
    }

    text
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"scene": "calme"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_markdown() {
        let text = "```json\n{\"scene\": \"calme\"}\n```";
        assert_eq!(extract_json(text), r#"{"scene": "calme"}"#);
    }

    #[test]
    fn test_extract_json_prose() {
        let text = "Voici la réponse : {\"a\": 1} merci";
        assert_eq!(extract_json(text), r#"{"a": 1}"#);
    }

    #[test]
    fn test_request_defaults() {
        let req = Request::new(ModelTier::Fallback, "sys", "user").with_max_tokens(200);
        assert!(req.json_mode);
        assert_eq!(req.max_tokens, 200);
        assert!(req.model.is_none());
    }

    #[test]
    fn test_model_for_tier() {
        let client = OracleClient::new("key")
            .expect("client should build")
            .with_primary_model("big")
            .with_fallback_model("small");
        assert_eq!(client.model_for(ModelTier::Primary), "big");
        assert_eq!(client.model_for(ModelTier::Fallback), "small");
    }

    #[test]
    fn test_response_json() {
        let response = Response {
            model: "m".to_string(),
            text: "```\n{\"confidence\": 0.5}\n```".to_string(),
            usage: None,
        };
        let value = response.json().expect("should parse");
        assert_eq!(value["confidence"], 0.5);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = OracleClient::new("key")
            .expect("client should build")
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(5));
        let err = client
            .complete(Request::new(ModelTier::Fallback, "s", "u"))
            .await
            .expect_err("nothing listens on port 9");
        assert!(matches!(err, Error::Network(_) | Error::Timeout(_)));
    }
}
