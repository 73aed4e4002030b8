//! Machine-readable account of how a turn was handled.

use crate::budget::AiCallBudget;
use crate::continuity::ContinuityReport;
use crate::director::ShortCircuit;
use crate::intent::ClassifierSource;
use crate::orchestrator::GateOutcome;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::warn;

/// Terminal state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A slash command was answered.
    SystemCommand,
    /// An outstanding gate was confirmed, cancelled or answered.
    Gate(GateOutcome),
    /// The turn ended in a clarification before tools and narration.
    Clarification(ShortCircuit),
    /// Answered without touching the world.
    Answered,
    /// Narrated with the mutation engine applied.
    Narrated,
    /// A gate is outstanding; the message did not resolve it.
    Held,
}

/// Everything recorded about one turn besides the reply itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDiagnostics {
    pub turn_id: String,
    pub outcome: TurnOutcome,
    #[serde(default)]
    pub classifier_source: Option<ClassifierSource>,
    /// Budget snapshot at the end of the turn, with every decision.
    pub budget: AiCallBudget,
    #[serde(default)]
    pub continuity: Option<ContinuityReport>,
    #[serde(default)]
    pub oracle_errors: Vec<String>,
    #[serde(default)]
    pub storage_errors: Vec<String>,
    #[serde(default)]
    pub bypass_honored: bool,
    #[serde(default)]
    pub tool_calls_deduplicated: usize,
    /// Write tools proposed on a turn that may not mutate.
    #[serde(default)]
    pub tool_calls_dropped: usize,
}

impl TurnDiagnostics {
    pub fn new(turn_id: impl Into<String>, budget: AiCallBudget) -> Self {
        Self {
            turn_id: turn_id.into(),
            outcome: TurnOutcome::Answered,
            classifier_source: None,
            budget,
            continuity: None,
            oracle_errors: Vec::new(),
            storage_errors: Vec::new(),
            bypass_honored: false,
            tool_calls_deduplicated: 0,
            tool_calls_dropped: 0,
        }
    }

    pub fn oracle_error(&mut self, stage: &str, error: impl Display) {
        warn!(stage, error = %error, "oracle unavailable, using local fallback");
        self.oracle_errors.push(format!("{stage}: {error}"));
    }

    pub fn storage_error(&mut self, operation: &str, error: impl Display) {
        warn!(operation, error = %error, "storage failure");
        self.storage_errors.push(format!("{operation}: {error}"));
    }

    /// Whether any collaborator failed during the turn.
    pub fn degraded(&self) -> bool {
        !self.oracle_errors.is_empty() || !self.storage_errors.is_empty()
    }
}
