//! The narrative oracle seam.
//!
//! The oracle is an untrusted, rate-limited function from a JSON context
//! document to a JSON answer. Everything it returns is parsed through
//! [`crate::sanitize`] before the engine looks at it.

use crate::budget::{AiCallBudget, CallKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, OracleError};
use crate::tools::ToolCall;
use async_trait::async_trait;
use oracle::{OracleClient, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest prompt/response preview written to debug logs.
const LOG_PREVIEW_CHARS: usize = 400;

/// Why the engine is calling the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OraclePurpose {
    Narrate,
    Refine,
    Regenerate,
    Classify,
    ContinuityCheck,
}

impl OraclePurpose {
    /// Budget bucket for this purpose.
    pub fn kind(self) -> CallKind {
        match self {
            OraclePurpose::Narrate | OraclePurpose::Refine | OraclePurpose::Regenerate => {
                CallKind::Primary
            }
            OraclePurpose::Classify | OraclePurpose::ContinuityCheck => CallKind::Fallback,
        }
    }

    /// Label used in budget decisions and logs.
    pub fn label(self) -> &'static str {
        match self {
            OraclePurpose::Narrate => "narrate",
            OraclePurpose::Refine => "refine",
            OraclePurpose::Regenerate => "regenerate",
            OraclePurpose::Classify => "classify",
            OraclePurpose::ContinuityCheck => "continuity_check",
        }
    }

    fn system_prompt(self) -> String {
        let specific = match self {
            OraclePurpose::Narrate => include_str!("prompts/narrate.txt"),
            OraclePurpose::Refine => include_str!("prompts/refine.txt"),
            OraclePurpose::Regenerate => include_str!("prompts/regenerate.txt"),
            OraclePurpose::Classify => return include_str!("prompts/classify.txt").to_string(),
            OraclePurpose::ContinuityCheck => {
                return include_str!("prompts/continuity_check.txt").to_string()
            }
        };
        let mut prompt = String::from(include_str!("prompts/narrator_base.txt"));
        prompt.push_str("\n\n");
        prompt.push_str(specific);
        prompt.push_str("\n\n");
        prompt.push_str(include_str!("prompts/reply_contract.txt"));
        prompt
    }
}

/// One oracle request.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleCall {
    pub purpose: OraclePurpose,
    pub kind: CallKind,
    /// Structured context document sent as the user message.
    pub context: Value,
}

impl OracleCall {
    pub fn new(purpose: OraclePurpose, context: Value) -> Self {
        Self {
            purpose,
            kind: purpose.kind(),
            context,
        }
    }
}

/// The external generative service.
#[async_trait]
pub trait NarrativeOracle: Send + Sync {
    async fn call(&self, call: &OracleCall) -> Result<Value, OracleError>;
}

/// Ask the budget first, then call the oracle.
pub async fn call_budgeted(
    oracle: &dyn NarrativeOracle,
    budget: &mut AiCallBudget,
    call: &OracleCall,
) -> Result<Value, OracleError> {
    let label = call.purpose.label();
    if !budget.try_consume(label, call.kind) {
        return Err(OracleError::BudgetExhausted {
            label: label.to_string(),
        });
    }
    oracle.call(call).await
}

// =============================================================================
// Draft
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    Narration,
    Dialogue,
    Lore,
    Status,
    Clarification,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldIntentKind {
    #[default]
    None,
    Travel,
    Engage,
    Leave,
    Access,
    Action,
}

/// What the oracle thinks the turn should do to the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldIntent {
    #[serde(rename = "type")]
    pub kind: WorldIntentKind,
    #[serde(default)]
    pub target_label: Option<String>,
}

/// A sanitized oracle reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeDraft {
    pub response_type: ResponseType,
    pub direct_answer: String,
    pub scene: String,
    pub action_result: String,
    pub consequences: Vec<String>,
    pub options: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub world_intent: WorldIntent,
    pub bypass_existing_mechanics: bool,
    pub confidence: f32,
}

impl NarrativeDraft {
    /// All player-visible text, for continuity checks.
    pub fn visible_text(&self) -> String {
        let mut parts: Vec<&str> = vec![
            self.direct_answer.as_str(),
            self.scene.as_str(),
            self.action_result.as_str(),
        ];
        parts.extend(self.consequences.iter().map(String::as_str));
        parts.extend(self.options.iter().map(String::as_str));
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.direct_answer.trim().is_empty()
            && self.scene.trim().is_empty()
            && self.action_result.trim().is_empty()
    }
}

// =============================================================================
// HTTP oracle
// =============================================================================

/// [`NarrativeOracle`] backed by the `oracle` HTTP client.
pub struct HttpNarrativeOracle {
    client: OracleClient,
    timeout: Duration,
}

impl HttpNarrativeOracle {
    pub fn new(client: OracleClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build from config. `Ok(None)` when no oracle is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Self>, EngineError> {
        let (Some(url), Some(key)) = (&config.oracle_url, &config.oracle_api_key) else {
            return Ok(None);
        };
        let mut client = OracleClient::new(key.clone())
            .map_err(|e| EngineError::Config(e.to_string()))?
            .with_base_url(url.clone())
            .with_timeout(config.oracle_timeout);
        if let Some(model) = &config.primary_model {
            client = client.with_primary_model(model.clone());
        }
        if let Some(model) = &config.fallback_model {
            client = client.with_fallback_model(model.clone());
        }
        Ok(Some(Self::new(client, config.oracle_timeout)))
    }
}

#[async_trait]
impl NarrativeOracle for HttpNarrativeOracle {
    async fn call(&self, call: &OracleCall) -> Result<Value, OracleError> {
        let user = serde_json::to_string(&call.context)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                purpose = call.purpose.label(),
                preview = %crate::text::truncate_chars(&user, LOG_PREVIEW_CHARS),
                "oracle request"
            );
        }

        let max_tokens = match call.kind {
            CallKind::Primary => 1200,
            CallKind::Fallback => 300,
        };
        let request = Request::new(call.kind.tier(), call.purpose.system_prompt(), user)
            .with_max_tokens(max_tokens)
            .with_timeout(self.timeout);

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(oracle::Error::Timeout(_)) => return Err(OracleError::Timeout),
            Err(e) => {
                warn!(purpose = call.purpose.label(), error = %e, "oracle call failed");
                return Err(e.into());
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                purpose = call.purpose.label(),
                model = %response.model,
                preview = %crate::text::truncate_chars(&response.text, LOG_PREVIEW_CHARS),
                "oracle response"
            );
        }

        response
            .json()
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}
