//! Per-turn AI call budget.
//!
//! Every oracle call asks [`AiCallBudget::try_consume`] first. The budget
//! is created fresh for each player message and dropped at the end of the
//! turn, so nothing leaks across turns.

use crate::config::BudgetConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which bucket an oracle call draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Primary,
    Fallback,
}

impl CallKind {
    /// The model tier this bucket routes to.
    pub fn tier(self) -> oracle::ModelTier {
        match self {
            CallKind::Primary => oracle::ModelTier::Primary,
            CallKind::Fallback => oracle::ModelTier::Fallback,
        }
    }
}

/// Outcome of one budget request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Consumed,
    TotalExhausted,
    PrimaryExhausted,
    FallbackExhausted,
}

/// One recorded budget decision, kept for routing telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDecision {
    pub label: String,
    pub kind: CallKind,
    pub granted: bool,
    pub reason: DecisionReason,
}

/// Per-turn oracle call budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCallBudget {
    pub max: u32,
    pub primary_max: u32,
    pub fallback_max: u32,
    pub used: u32,
    pub primary_used: u32,
    pub fallback_used: u32,
    /// Labels of denied requests.
    pub blocked: Vec<String>,
    /// Every decision in request order.
    pub decisions: Vec<BudgetDecision>,
}

impl AiCallBudget {
    /// Create a budget with the given ceilings.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            max: config.max,
            primary_max: config.primary_max.min(config.max),
            fallback_max: config.fallback_max.min(config.max),
            used: 0,
            primary_used: 0,
            fallback_used: 0,
            blocked: Vec::new(),
            decisions: Vec::new(),
        }
    }

    /// A budget that denies everything.
    pub fn exhausted() -> Self {
        Self::new(BudgetConfig {
            max: 0,
            primary_max: 0,
            fallback_max: 0,
        })
    }

    /// Request one call. Returns whether the caller may proceed.
    pub fn try_consume(&mut self, label: &str, kind: CallKind) -> bool {
        let reason = if self.used >= self.max {
            DecisionReason::TotalExhausted
        } else {
            match kind {
                CallKind::Primary if self.primary_used >= self.primary_max => {
                    DecisionReason::PrimaryExhausted
                }
                CallKind::Fallback if self.fallback_used >= self.fallback_max => {
                    DecisionReason::FallbackExhausted
                }
                _ => DecisionReason::Consumed,
            }
        };

        let granted = reason == DecisionReason::Consumed;
        if granted {
            self.used += 1;
            match kind {
                CallKind::Primary => self.primary_used += 1,
                CallKind::Fallback => self.fallback_used += 1,
            }
        } else {
            self.blocked.push(label.to_string());
        }

        debug!(label, ?kind, granted, ?reason, used = self.used, "ai budget decision");
        self.decisions.push(BudgetDecision {
            label: label.to_string(),
            kind,
            granted,
            reason,
        });
        granted
    }

    /// Whether a call of `kind` would currently be granted.
    pub fn can_consume(&self, kind: CallKind) -> bool {
        self.used < self.max
            && match kind {
                CallKind::Primary => self.primary_used < self.primary_max,
                CallKind::Fallback => self.fallback_used < self.fallback_max,
            }
    }

    /// Calls still available in total.
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    /// Zero the counters, keeping the ceilings.
    pub fn reset(&mut self) {
        self.used = 0;
        self.primary_used = 0;
        self.fallback_used = 0;
        self.blocked.clear();
        self.decisions.clear();
    }
}
