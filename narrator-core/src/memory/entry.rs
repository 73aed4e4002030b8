//! Memory entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The five kinds of thing the session remembers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Place,
    Npc,
    Fact,
    Rumor,
    Debt,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Place,
        EntityKind::Npc,
        EntityKind::Fact,
        EntityKind::Rumor,
        EntityKind::Debt,
    ];

    /// In-game hours an entry lives without interaction.
    pub fn base_ttl_hours(self) -> f64 {
        match self {
            EntityKind::Place => 72.0,
            EntityKind::Npc => 48.0,
            EntityKind::Fact => 96.0,
            EntityKind::Rumor => 24.0,
            EntityKind::Debt => 168.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Place => "place",
            EntityKind::Npc => "npc",
            EntityKind::Fact => "fact",
            EntityKind::Rumor => "rumor",
            EntityKind::Debt => "debt",
        }
    }

    /// French display name.
    pub fn display(self) -> &'static str {
        match self {
            EntityKind::Place => "Lieu",
            EntityKind::Npc => "Personnage",
            EntityKind::Fact => "Fait",
            EntityKind::Rumor => "Rumeur",
            EntityKind::Debt => "Dette",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Active,
    Resolved,
    Archived,
}

/// Decay and placement data of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryData {
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub location_label: Option<String>,
    /// Attention score in [0, 3].
    #[serde(default)]
    pub interest_score: f64,
    /// Boost applied on each interaction.
    #[serde(default)]
    pub interaction_weight: f64,
    #[serde(default)]
    pub interaction_count: u32,
    #[serde(default)]
    pub last_seen_at_game_min: i64,
    /// Last in-game minute decay was applied up to.
    #[serde(default)]
    pub decayed_at_game_min: i64,
    /// Base lifetime in in-game hours, before the interest boost.
    #[serde(default)]
    pub ttl_game_hours: f64,
    /// Never decreases.
    #[serde(default)]
    pub expires_at_game_min: i64,
    /// Free-form keys set by writers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One remembered place, person, fact, rumor or debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Real-time expiry, if the writer asked for one.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub data: EntryData,
}

impl MemoryEntry {
    /// A fresh entry with no interaction applied yet.
    pub fn new(label: impl Into<String>, now_game_min: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            text: String::new(),
            tags: Vec::new(),
            source: String::new(),
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: None,
            data: EntryData {
                last_seen_at_game_min: now_game_min,
                decayed_at_game_min: now_game_min,
                expires_at_game_min: now_game_min,
                ..Default::default()
            },
        }
    }

    /// Expired on either clock.
    pub fn is_expired(&self, now_game_min: i64, now: DateTime<Utc>) -> bool {
        now_game_min >= self.data.expires_at_game_min
            || self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this entry belongs to the given location.
    pub fn is_at(&self, location_id: &str, location_label: &str) -> bool {
        let by_id = self
            .data
            .location_id
            .as_deref()
            .is_some_and(|id| id == location_id);
        let by_label = self.data.location_label.as_deref().is_some_and(|label| {
            crate::text::normalize(label) == crate::text::normalize(location_label)
        });
        by_id || by_label
    }
}

/// An entry tagged with its kind, as returned by reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRow {
    pub entity: EntityKind,
    #[serde(flatten)]
    pub entry: MemoryEntry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_expires_immediately_until_touched() {
        let now = Utc::now();
        let entry = MemoryEntry::new("Garde", 600, now);
        assert!(entry.is_expired(600, now));
        assert_eq!(entry.data.decayed_at_game_min, 600);
    }

    #[test]
    fn test_real_time_expiry() {
        let now = Utc::now();
        let mut entry = MemoryEntry::new("Garde", 0, now);
        entry.data.expires_at_game_min = 10_000;
        assert!(!entry.is_expired(0, now));
        entry.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(entry.is_expired(0, now));
    }

    #[test]
    fn test_is_at_matches_id_or_label() {
        let mut entry = MemoryEntry::new("Garde", 0, Utc::now());
        entry.data.location_label = Some("Port Est".to_string());
        assert!(entry.is_at("autre", "port est"));
        entry.data.location_label = None;
        entry.data.location_id = Some("port-est".to_string());
        assert!(entry.is_at("port-est", "Ailleurs"));
        assert!(!entry.is_at("marche", "Marché"));
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&EntityKind::Npc).unwrap();
        assert_eq!(json, "\"npc\"");
        assert_eq!(EntityKind::Debt.base_ttl_hours(), 168.0);
    }
}
