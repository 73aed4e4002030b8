//! Pending gates: proposed state changes awaiting the player's answer.

use crate::intent::{Commitment, IntentType, RiskLevel};
use crate::text::slugify;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access attempts allowed before a challenge is failed.
pub const DEFAULT_MAX_ACCESS_ATTEMPTS: u32 = 3;

/// A reference to a location by id and display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRef {
    pub id: String,
    pub label: String,
}

impl LocationRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Derive the id from the label ("Port Est" -> "port-est").
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        let label = label.trim().to_string();
        let id = match slugify(&label) {
            slug if slug.is_empty() => "lieu-inconnu".to_string(),
            slug => slug,
        };
        Self { id, label }
    }
}

/// A proposed move between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTravel {
    pub id: String,
    pub from: LocationRef,
    pub to: LocationRef,
    pub duration_min: u32,
    pub reason: String,
    pub created_at_game_min: i64,
}

impl PendingTravel {
    pub fn new(from: LocationRef, to: LocationRef, duration_min: u32, now_game_min: i64) -> Self {
        let reason = format!("Trajet vers {}", to.label);
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            duration_min,
            reason,
            created_at_game_min: now_game_min,
        }
    }
}

/// A guarded location the player must talk their way into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAccess {
    pub id: String,
    pub target: LocationRef,
    pub challenge: String,
    /// Normalized keywords; any one of them in the answer grants access.
    pub accepted_answers: Vec<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at_game_min: i64,
}

impl PendingAccess {
    pub fn new(
        target: LocationRef,
        challenge: impl Into<String>,
        accepted_answers: Vec<String>,
        now_game_min: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target,
            challenge: challenge.into(),
            accepted_answers,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ACCESS_ATTEMPTS,
            created_at_game_min: now_game_min,
        }
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// A risky action held back until the player confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: String,
    /// The player's phrasing, as proposed.
    pub label: String,
    pub intent_type: IntentType,
    pub commitment: Commitment,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub target_label: Option<String>,
    pub created_at_game_min: i64,
}

impl PendingAction {
    pub fn new(
        label: impl Into<String>,
        intent_type: IntentType,
        commitment: Commitment,
        risk_level: RiskLevel,
        target_label: Option<String>,
        now_game_min: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            intent_type,
            commitment,
            risk_level,
            target_label,
            created_at_game_min: now_game_min,
        }
    }
}
