//! Scene frame: what and who the player is focused on.

use crate::text::{normalize, truncate_chars};
use serde::{Deserialize, Serialize};

/// Maximum facts kept in a scene frame.
pub const MAX_RECENT_FACTS: usize = 6;

const MAX_FACT_CHARS: usize = 240;

/// Anchors used to detect narrative drift between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneFrame {
    pub location_id: String,
    pub location_label: String,
    #[serde(default)]
    pub active_poi_label: Option<String>,
    #[serde(default)]
    pub active_interlocutor_label: Option<String>,
    #[serde(default)]
    pub active_topic: Option<String>,
    #[serde(default)]
    pub recent_facts: Vec<String>,
}

impl SceneFrame {
    /// A fresh frame anchored at a location, with nothing in focus.
    pub fn anchored_at(location_id: impl Into<String>, location_label: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            location_label: location_label.into(),
            ..Default::default()
        }
    }

    /// Push a fact, dropping duplicates and the oldest beyond the cap.
    pub fn push_fact(&mut self, fact: &str) {
        let fact = truncate_chars(fact.trim(), MAX_FACT_CHARS);
        if fact.is_empty() {
            return;
        }
        let key = normalize(&fact);
        self.recent_facts.retain(|f| normalize(f) != key);
        self.recent_facts.push(fact);
        if self.recent_facts.len() > MAX_RECENT_FACTS {
            let excess = self.recent_facts.len() - MAX_RECENT_FACTS;
            self.recent_facts.drain(..excess);
        }
    }

    /// Drop self-referencing anchors.
    ///
    /// An interlocutor or POI that names the player, or names the current
    /// location, is not a valid focus.
    pub fn validated(mut self, player_name: Option<&str>) -> Self {
        let location = normalize(&self.location_label);
        let player = player_name.map(normalize).filter(|p| !p.is_empty());
        let is_self = |label: &str| {
            let label = normalize(label);
            label.is_empty()
                || label == location
                || player.as_deref() == Some(label.as_str())
                || is_player_pronoun(&label)
        };

        if self.active_interlocutor_label.as_deref().is_some_and(is_self) {
            self.active_interlocutor_label = None;
        }
        if self.active_poi_label.as_deref().is_some_and(is_self) {
            self.active_poi_label = None;
        }
        if self
            .active_topic
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            self.active_topic = None;
        }
        if self.recent_facts.len() > MAX_RECENT_FACTS {
            let excess = self.recent_facts.len() - MAX_RECENT_FACTS;
            self.recent_facts.drain(..excess);
        }
        self
    }
}

fn is_player_pronoun(label: &str) -> bool {
    matches!(label, "moi" | "je" | "me" | "myself" | "le joueur" | "the player" | "joueur" | "player")
}

/// Where the conversation stands, as seen by the continuity guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeStage {
    Exploration,
    Conversation,
    TravelProposal,
    AccessChallenge,
    ActionConfirmation,
}

/// The last reply that passed validation, kept for the deterministic fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFragments {
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub action_result: String,
    #[serde(default)]
    pub consequences: Vec<String>,
}

impl ReplyFragments {
    pub fn is_empty(&self) -> bool {
        self.scene.trim().is_empty()
            && self.action_result.trim().is_empty()
            && self.consequences.is_empty()
    }
}
