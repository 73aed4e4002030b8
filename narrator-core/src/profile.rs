//! Player character snapshot and the rules pack derived from it.
//!
//! The character sheet itself lives outside the engine; this module only
//! keeps what narration and `query_player_sheet` need.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAX_NAME_CHARS: usize = 60;
const MAX_LIST_ITEMS: usize = 24;

/// The player's character as sent by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub ancestry: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Anything else the host sent, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_level() -> u8 {
    1
}

impl CharacterProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: 1,
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Lenient parse of a host-provided profile.
    ///
    /// Returns `None` when no usable name is present. Levels are clamped to
    /// 1..=20 and lists capped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let list = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .take(MAX_LIST_ITEMS)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let name = crate::text::truncate_chars(&text("name")?, MAX_NAME_CHARS);
        let level = obj
            .get("level")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(1)
            .clamp(1, 20) as u8;

        let known = [
            "name",
            "ancestry",
            "race",
            "class",
            "level",
            "background",
            "skills",
            "traits",
        ];
        let extra = obj
            .iter()
            .filter(|(k, _)| !known.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            name,
            ancestry: text("ancestry").or_else(|| text("race")),
            class: text("class"),
            level,
            background: text("background"),
            skills: list("skills"),
            traits: list("traits"),
            extra,
        })
    }

    /// Proficiency bonus by level.
    pub fn proficiency_bonus(&self) -> i8 {
        match self.level {
            1..=4 => 2,
            5..=8 => 3,
            9..=12 => 4,
            13..=16 => 5,
            _ => 6,
        }
    }
}

/// Rules context derived from a profile, handed to `query_rules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesPack {
    pub level: u8,
    pub proficiency_bonus: i8,
    pub proficient_skills: Vec<String>,
    pub traits: Vec<String>,
    pub summary: String,
}

/// Derive the rules pack for a profile. Without a profile, a level-1 baseline.
pub fn derive_rules_pack(profile: Option<&CharacterProfile>) -> RulesPack {
    let Some(profile) = profile else {
        return RulesPack {
            level: 1,
            proficiency_bonus: 2,
            proficient_skills: Vec::new(),
            traits: Vec::new(),
            summary: "Aventurier sans fiche, niveau 1".to_string(),
        };
    };

    let mut summary = profile.name.clone();
    if let Some(class) = &profile.class {
        summary.push_str(&format!(", {class}"));
    }
    summary.push_str(&format!(" niveau {}", profile.level));
    if let Some(ancestry) = &profile.ancestry {
        summary.push_str(&format!(" ({ancestry})"));
    }

    RulesPack {
        level: profile.level,
        proficiency_bonus: profile.proficiency_bonus(),
        proficient_skills: profile.skills.clone(),
        traits: profile.traits.clone(),
        summary,
    }
}
