//! Lenient parsers for loosely-typed documents.
//!
//! Oracle replies and persisted documents arrive as `serde_json::Value`.
//! Everything in here turns them into canonical records: unknown enum
//! values fall back to safe defaults, strings are trimmed and capped, and
//! numbers are clamped. Only a missing identity field is an error.

use crate::intent::{ActionKind, Commitment, Intent, IntentType, RiskLevel};
use crate::error::ValidationError;
use crate::memory::decay::MAX_INTEREST;
use crate::memory::{DataPatch, DeleteOp, EntityKind, EntryStatus, MemoryEntry, MemoryOp, UpsertOp};
use crate::narration::{NarrativeDraft, ResponseType, WorldIntent, WorldIntentKind};
use crate::text::{normalize, truncate_chars};
use crate::tools::ToolCall;
use crate::world::{
    LocationRef, PendingAccess, PendingAction, PendingTravel, SceneFrame,
    DEFAULT_MAX_ACCESS_ATTEMPTS, MAX_TRAVEL_MINUTES,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

const MAX_REASON_CHARS: usize = 160;
const MAX_TARGET_CHARS: usize = 60;
const MAX_LABEL_CHARS: usize = 120;
const MAX_MEMORY_TEXT_CHARS: usize = 600;
const MAX_TAGS: usize = 8;
const MAX_TAG_CHARS: usize = 40;
const MAX_FRAME_LABEL_CHARS: usize = 80;

const MAX_DIRECT_ANSWER_CHARS: usize = 600;
const MAX_SCENE_CHARS: usize = 900;
const MAX_ACTION_RESULT_CHARS: usize = 600;
const MAX_CONSEQUENCE_CHARS: usize = 240;
const MAX_OPTION_CHARS: usize = 160;
const MAX_CONSEQUENCES: usize = 4;
const MAX_OPTIONS: usize = 4;
const MAX_TOOL_CALLS: usize = 6;

const MAX_TTL_SECONDS: i64 = 30 * 24 * 3600;
const MAX_TTL_GAME_HOURS: f64 = 24.0 * 30.0;

/// Keys the store computes itself; writers cannot set them.
const COMPUTED_DATA_KEYS: &[&str] = &[
    "interestScore",
    "interactionCount",
    "lastSeenAtGameMin",
    "decayedAtGameMin",
    "expiresAtGameMin",
];

// =============================================================================
// Field helpers
// =============================================================================

fn as_object<'a>(value: &'a Value, field: &'static str) -> Result<&'a Map<String, Value>, ValidationError> {
    value.as_object().ok_or(ValidationError::InvalidType {
        field,
        expected: "object",
    })
}

/// First non-empty trimmed string among `keys`.
fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

fn capped(obj: &Map<String, Value>, keys: &[&str], max_chars: usize) -> Option<String> {
    text(obj, keys).map(|s| truncate_chars(&s, max_chars))
}

fn number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
}

fn flag(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match normalize(s).as_str() {
                "true" | "oui" | "yes" => Some(true),
                "false" | "non" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        })
        .unwrap_or(false)
}

fn string_list(value: Option<&Value>, max_items: usize, max_chars: usize) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, max_chars))
        .take(max_items)
        .collect()
}

/// Parse a snake_case enum from free-form text: `"Story-Action"` reads as
/// `story_action`.
pub fn parse_enum<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let key: String = normalize(raw)
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();
    serde_json::from_value(Value::String(key)).ok()
}

fn location(value: Option<&Value>) -> Option<LocationRef> {
    match value? {
        Value::String(label) if !label.trim().is_empty() => Some(LocationRef::from_label(label.as_str())),
        Value::Object(obj) => {
            let label = text(obj, &["label", "name"])?;
            let mut loc = LocationRef::from_label(truncate_chars(&label, MAX_FRAME_LABEL_CHARS));
            if let Some(id) = text(obj, &["id"]) {
                loc.id = id;
            }
            Some(loc)
        }
        _ => None,
    }
}

// =============================================================================
// Intent
// =============================================================================

/// Parse an oracle classification.
///
/// The type is required. Unknown commitments read as informative and
/// unknown risk levels as low, so a garbled answer never makes a turn more
/// binding than it would otherwise be.
pub fn parse_intent(value: &Value) -> Result<Intent, ValidationError> {
    let obj = as_object(value, "intent")?;
    let raw_type = text(obj, &["type", "intentType", "intent"]).ok_or(ValidationError::MissingField("type"))?;
    let intent_type: IntentType = parse_enum(&raw_type).ok_or(ValidationError::UnknownVariant {
        field: "type",
        value: raw_type,
    })?;

    let commitment = text(obj, &["commitment"])
        .and_then(|c| parse_enum(&c))
        .unwrap_or(Commitment::Informatif);
    let risk_level = match text(obj, &["riskLevel", "risk"]) {
        Some(raw) => parse_enum(&raw).unwrap_or(RiskLevel::Low),
        None => RiskLevel::None,
    };
    let action = text(obj, &["action"])
        .and_then(|a| parse_enum(&a))
        .unwrap_or(ActionKind::None);

    Ok(Intent {
        intent_type,
        confidence: number(obj, &["confidence"]).unwrap_or(0.5).clamp(0.0, 1.0) as f32,
        requires_check: flag(obj, &["requiresCheck"]),
        risk_level,
        commitment,
        reason: capped(obj, &["reason"], MAX_REASON_CHARS).unwrap_or_default(),
        action,
        target: capped(obj, &["target", "targetLabel"], MAX_TARGET_CHARS),
        pronoun_reference: flag(obj, &["pronounReference"]),
    })
}

// =============================================================================
// Memory
// =============================================================================

/// Entity kind from English or French names, singular or plural.
pub fn parse_entity_kind(raw: &str) -> Option<EntityKind> {
    match normalize(raw).trim_end_matches('s') {
        "place" | "lieu" | "lieux" | "location" => Some(EntityKind::Place),
        "npc" | "pnj" | "character" | "personnage" => Some(EntityKind::Npc),
        "fact" | "fait" => Some(EntityKind::Fact),
        "rumor" | "rumour" | "rumeur" => Some(EntityKind::Rumor),
        "debt" | "dette" => Some(EntityKind::Debt),
        _ => None,
    }
}

fn data_patch(value: Option<&Value>) -> DataPatch {
    let Some(Value::Object(obj)) = value else {
        return DataPatch::default();
    };
    let mut patch = DataPatch {
        location_id: text(obj, &["locationId"]),
        location_label: capped(obj, &["locationLabel"], MAX_FRAME_LABEL_CHARS),
        interaction_weight: number(obj, &["interactionWeight"]).map(|w| w.clamp(0.0, MAX_INTEREST)),
        ttl_game_hours: number(obj, &["ttlGameHours"]).map(|h| h.clamp(1.0, MAX_TTL_GAME_HOURS)),
        extra: Map::new(),
    };
    for (key, value) in obj {
        let known = matches!(
            key.as_str(),
            "locationId" | "locationLabel" | "interactionWeight" | "ttlGameHours"
        );
        if !known && !COMPUTED_DATA_KEYS.contains(&key.as_str()) {
            patch.extra.insert(key.clone(), value.clone());
        }
    }
    patch
}

/// Parse one `session_db_write` operation.
pub fn parse_memory_op(value: &Value) -> Result<MemoryOp, ValidationError> {
    let obj = as_object(value, "operation")?;
    let raw_entity = text(obj, &["entity", "kind", "type"]).ok_or(ValidationError::MissingField("entity"))?;
    let entity = parse_entity_kind(&raw_entity).ok_or(ValidationError::UnknownVariant {
        field: "entity",
        value: raw_entity,
    })?;
    let id = text(obj, &["id"]);
    let label = capped(obj, &["label", "name"], MAX_LABEL_CHARS);

    let op = text(obj, &["op", "operation", "action"]).map(|o| normalize(&o));
    match op.as_deref() {
        None | Some("upsert") | Some("insert") | Some("update") | Some("set") => {}
        Some("delete") | Some("remove") => {
            if id.is_none() && label.is_none() {
                return Err(ValidationError::MissingField("label"));
            }
            return Ok(MemoryOp::Delete(DeleteOp { entity, id, label }));
        }
        Some(other) => {
            return Err(ValidationError::UnknownVariant {
                field: "op",
                value: other.to_string(),
            })
        }
    }

    let label = match label {
        Some(label) => label,
        None if obj.contains_key("label") => return Err(ValidationError::Empty("label")),
        None => return Err(ValidationError::MissingField("label")),
    };
    let ttl_seconds = number(obj, &["ttlSeconds"])
        .filter(|s| *s > 0.0)
        .map(|s| (s.round() as i64).min(MAX_TTL_SECONDS));

    Ok(MemoryOp::Upsert(UpsertOp {
        entity,
        id,
        label,
        text: capped(obj, &["text", "description"], MAX_MEMORY_TEXT_CHARS),
        tags: string_list(obj.get("tags"), MAX_TAGS, MAX_TAG_CHARS),
        source: capped(obj, &["source"], MAX_TAG_CHARS),
        status: text(obj, &["status"]).and_then(|s| parse_enum::<EntryStatus>(&s)),
        ttl_seconds,
        data: data_patch(obj.get("data")),
    }))
}

/// Parse a stored entry, repairing out-of-range decay data.
pub fn parse_memory_entry(value: &Value) -> Result<MemoryEntry, ValidationError> {
    as_object(value, "entry")?;
    let mut entry: MemoryEntry = serde_json::from_value(value.clone()).map_err(|_| {
        ValidationError::InvalidType {
            field: "entry",
            expected: "memory entry",
        }
    })?;
    entry.label = entry.label.trim().to_string();
    if entry.label.is_empty() {
        return Err(ValidationError::Empty("label"));
    }
    let data = &mut entry.data;
    if !data.interest_score.is_finite() {
        data.interest_score = 0.0;
    }
    data.interest_score = data.interest_score.clamp(0.0, MAX_INTEREST);
    if !data.interaction_weight.is_finite() {
        data.interaction_weight = 0.0;
    }
    data.interaction_weight = data.interaction_weight.clamp(0.0, MAX_INTEREST);
    if !data.ttl_game_hours.is_finite() || data.ttl_game_hours <= 0.0 {
        data.ttl_game_hours = 1.0;
    }
    data.decayed_at_game_min = data.decayed_at_game_min.max(0);
    for key in COMPUTED_DATA_KEYS {
        data.extra.remove(*key);
    }
    Ok(entry)
}

// =============================================================================
// Conversation gates
// =============================================================================

fn game_minute(obj: &Map<String, Value>) -> i64 {
    number(obj, &["createdAtGameMin"]).map_or(0, |m| m.max(0.0) as i64)
}

pub fn parse_pending_travel(value: &Value) -> Result<PendingTravel, ValidationError> {
    let obj = as_object(value, "pendingTravel")?;
    let to = location(obj.get("to")).ok_or(ValidationError::MissingField("to"))?;
    let from = location(obj.get("from")).unwrap_or_else(|| to.clone());
    let duration = number(obj, &["durationMin"])
        .unwrap_or(0.0)
        .clamp(0.0, MAX_TRAVEL_MINUTES as f64) as u32;

    let mut travel = PendingTravel::new(from, to, duration, game_minute(obj));
    if let Some(id) = text(obj, &["id"]) {
        travel.id = id;
    }
    if let Some(reason) = capped(obj, &["reason"], MAX_REASON_CHARS) {
        travel.reason = reason;
    }
    Ok(travel)
}

pub fn parse_pending_access(value: &Value) -> Result<PendingAccess, ValidationError> {
    let obj = as_object(value, "pendingAccess")?;
    let target = location(obj.get("target")).ok_or(ValidationError::MissingField("target"))?;
    let challenge = capped(obj, &["challenge"], MAX_REASON_CHARS).unwrap_or_else(|| "Qui va là ?".to_string());
    let answers = string_list(obj.get("acceptedAnswers"), MAX_TAGS, MAX_TAG_CHARS)
        .iter()
        .map(|a| normalize(a))
        .collect();

    let mut access = PendingAccess::new(target, challenge, answers, game_minute(obj));
    if let Some(id) = text(obj, &["id"]) {
        access.id = id;
    }
    access.max_attempts = number(obj, &["maxAttempts"])
        .map_or(DEFAULT_MAX_ACCESS_ATTEMPTS, |m| m.clamp(1.0, 10.0) as u32);
    access.attempts = number(obj, &["attempts"]).map_or(0, |a| a.clamp(0.0, access.max_attempts as f64) as u32);
    Ok(access)
}

pub fn parse_pending_action(value: &Value) -> Result<PendingAction, ValidationError> {
    let obj = as_object(value, "pendingAction")?;
    let label = capped(obj, &["label"], MAX_LABEL_CHARS).ok_or(ValidationError::MissingField("label"))?;
    let mut action = PendingAction::new(
        label,
        text(obj, &["intentType"]).and_then(|t| parse_enum(&t)).unwrap_or(IntentType::StoryAction),
        text(obj, &["commitment"]).and_then(|c| parse_enum(&c)).unwrap_or(Commitment::Declaratif),
        text(obj, &["riskLevel"]).and_then(|r| parse_enum(&r)).unwrap_or(RiskLevel::High),
        capped(obj, &["targetLabel"], MAX_TARGET_CHARS),
        game_minute(obj),
    );
    if let Some(id) = text(obj, &["id"]) {
        action.id = id;
    }
    Ok(action)
}

/// Parse a stored scene frame. Anchoring and validation against the world
/// happen in [`crate::world::WorldState::sanitized`].
pub fn parse_scene_frame(value: &Value) -> Result<SceneFrame, ValidationError> {
    let obj = as_object(value, "sceneFrame")?;
    let mut frame = SceneFrame {
        location_id: text(obj, &["locationId"]).unwrap_or_default(),
        location_label: capped(obj, &["locationLabel"], MAX_FRAME_LABEL_CHARS).unwrap_or_default(),
        active_poi_label: capped(obj, &["activePoiLabel"], MAX_FRAME_LABEL_CHARS),
        active_interlocutor_label: capped(obj, &["activeInterlocutorLabel"], MAX_FRAME_LABEL_CHARS),
        active_topic: capped(obj, &["activeTopic"], MAX_REASON_CHARS),
        recent_facts: Vec::new(),
    };
    if let Some(Value::Array(facts)) = obj.get("recentFacts") {
        for fact in facts.iter().filter_map(Value::as_str) {
            frame.push_fact(fact);
        }
    }
    Ok(frame)
}

// =============================================================================
// Narration
// =============================================================================

/// Parse a tool call requested by the oracle.
pub fn parse_tool_call(value: &Value) -> Result<ToolCall, ValidationError> {
    let obj = as_object(value, "toolCall")?;
    let name = text(obj, &["name", "tool"]).ok_or(ValidationError::MissingField("name"))?;
    let args = match ["args", "arguments", "input"].iter().find_map(|k| obj.get(*k)) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|_| ValidationError::InvalidType {
            field: "args",
            expected: "object",
        })?,
        Some(other) => other.clone(),
    };
    if !args.is_object() {
        return Err(ValidationError::InvalidType {
            field: "args",
            expected: "object",
        });
    }
    Ok(ToolCall::oracle(name, args))
}

fn world_intent(value: Option<&Value>) -> WorldIntent {
    match value {
        Some(Value::String(kind)) => WorldIntent {
            kind: parse_enum(kind).unwrap_or_default(),
            target_label: None,
        },
        Some(Value::Object(obj)) => WorldIntent {
            kind: text(obj, &["type", "kind"])
                .and_then(|k| parse_enum::<WorldIntentKind>(&k))
                .unwrap_or_default(),
            target_label: capped(obj, &["targetLabel", "target"], MAX_TARGET_CHARS),
        },
        _ => WorldIntent::default(),
    }
}

/// Parse a narration reply. Malformed tool calls are dropped.
pub fn parse_narrative_draft(value: &Value) -> Result<NarrativeDraft, ValidationError> {
    let obj = as_object(value, "narration")?;
    let tool_calls = match obj.get("toolCalls") {
        Some(Value::Array(calls)) => calls
            .iter()
            .filter_map(|c| parse_tool_call(c).ok())
            .take(MAX_TOOL_CALLS)
            .collect(),
        _ => Vec::new(),
    };

    Ok(NarrativeDraft {
        response_type: text(obj, &["responseType"])
            .and_then(|t| parse_enum::<ResponseType>(&t))
            .unwrap_or_default(),
        direct_answer: capped(obj, &["directAnswer", "answer"], MAX_DIRECT_ANSWER_CHARS).unwrap_or_default(),
        scene: capped(obj, &["scene", "narration"], MAX_SCENE_CHARS).unwrap_or_default(),
        action_result: capped(obj, &["actionResult"], MAX_ACTION_RESULT_CHARS).unwrap_or_default(),
        consequences: string_list(obj.get("consequences"), MAX_CONSEQUENCES, MAX_CONSEQUENCE_CHARS),
        options: string_list(obj.get("options"), MAX_OPTIONS, MAX_OPTION_CHARS),
        tool_calls,
        world_intent: world_intent(obj.get("worldIntent")),
        bypass_existing_mechanics: flag(obj, &["bypassExistingMechanics"]),
        confidence: number(obj, &["confidence"]).unwrap_or(0.5).clamp(0.0, 1.0) as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_enum_is_forgiving() {
        assert_eq!(parse_enum::<IntentType>("Story-Action"), Some(IntentType::StoryAction));
        assert_eq!(parse_enum::<IntentType>(" lore question "), Some(IntentType::LoreQuestion));
        assert_eq!(parse_enum::<Commitment>("HYPOTHÉTIQUE"), Some(Commitment::Hypothetique));
        assert_eq!(parse_enum::<IntentType>("dance"), None);
    }

    #[test]
    fn test_intent_requires_known_type() {
        assert_eq!(
            parse_intent(&json!({"confidence": 0.9})),
            Err(ValidationError::MissingField("type"))
        );
        assert!(matches!(
            parse_intent(&json!({"type": "party"})),
            Err(ValidationError::UnknownVariant { .. })
        ));
        assert!(parse_intent(&json!("story_action")).is_err());
    }

    #[test]
    fn test_intent_defaults_are_safe() {
        let intent = parse_intent(&json!({
            "type": "story_action",
            "commitment": "maybe",
            "riskLevel": "extreme",
            "confidence": 7,
            "reason": "x".repeat(500),
        }))
        .unwrap();
        assert_eq!(intent.commitment, Commitment::Informatif);
        assert_eq!(intent.risk_level, RiskLevel::Low);
        assert_eq!(intent.confidence, 1.0);
        assert_eq!(intent.reason.chars().count(), MAX_REASON_CHARS);

        let intent = parse_intent(&json!({"type": "social_action", "confidence": "n/a"})).unwrap();
        assert_eq!(intent.confidence, 0.5);
        assert_eq!(intent.risk_level, RiskLevel::None);
    }

    #[test]
    fn test_memory_op_aliases_and_caps() {
        let op = parse_memory_op(&json!({
            "entity": "PNJ",
            "label": " Garde ",
            "text": "y".repeat(1000),
            "tags": ["a", "b", "c", "d", "e", "f", "g", "h", "i", 3],
            "data": {"interestScore": 3, "interactionWeight": 9, "humeur": "méfiant"},
            "ttlSeconds": 120
        }))
        .unwrap();
        let MemoryOp::Upsert(op) = op else {
            panic!("expected upsert");
        };
        assert_eq!(op.entity, EntityKind::Npc);
        assert_eq!(op.label, "Garde");
        assert_eq!(op.text.unwrap().chars().count(), MAX_MEMORY_TEXT_CHARS);
        assert_eq!(op.tags.len(), MAX_TAGS);
        assert_eq!(op.ttl_seconds, Some(120));
        assert_eq!(op.data.interaction_weight, Some(MAX_INTEREST));
        assert!(!op.data.extra.contains_key("interestScore"));
        assert_eq!(op.data.extra.get("humeur"), Some(&json!("méfiant")));
    }

    #[test]
    fn test_memory_op_errors() {
        assert_eq!(
            parse_memory_op(&json!({"label": "X"})),
            Err(ValidationError::MissingField("entity"))
        );
        assert_eq!(
            parse_memory_op(&json!({"entity": "fait", "label": "  "})),
            Err(ValidationError::Empty("label"))
        );
        assert!(matches!(
            parse_memory_op(&json!({"entity": "rumeur", "op": "explode", "label": "X"})),
            Err(ValidationError::UnknownVariant { field: "op", .. })
        ));
        assert!(matches!(
            parse_memory_op(&json!({"entity": "dette", "op": "delete", "label": "Ovan"})),
            Ok(MemoryOp::Delete(_))
        ));
    }

    #[test]
    fn test_entity_kind_plurals() {
        assert_eq!(parse_entity_kind("Rumeurs"), Some(EntityKind::Rumor));
        assert_eq!(parse_entity_kind("places"), Some(EntityKind::Place));
        assert_eq!(parse_entity_kind("dragon"), None);
    }

    #[test]
    fn test_narrative_draft_caps() {
        let draft = parse_narrative_draft(&json!({
            "responseType": "Dialogue",
            "scene": "s".repeat(2000),
            "consequences": ["a", "b", "c", "d", "e"],
            "toolCalls": [
                {"name": "query_lore", "args": {"query": "port"}},
                {"args": {}},
                {"tool": "get_world_state", "arguments": "{}"}
            ],
            "worldIntent": {"type": "travel", "targetLabel": "Port Est"},
            "confidence": -3
        }))
        .unwrap();
        assert_eq!(draft.response_type, ResponseType::Dialogue);
        assert_eq!(draft.scene.chars().count(), MAX_SCENE_CHARS);
        assert_eq!(draft.consequences.len(), MAX_CONSEQUENCES);
        assert_eq!(draft.tool_calls.len(), 2);
        assert_eq!(draft.tool_calls[1].name, "get_world_state");
        assert_eq!(draft.world_intent.kind, WorldIntentKind::Travel);
        assert_eq!(draft.confidence, 0.0);
    }

    #[test]
    fn test_pending_travel_from_labels() {
        let travel = parse_pending_travel(&json!({
            "from": "Place du Marché",
            "to": {"label": "Port Est"},
            "durationMin": 99999999
        }))
        .unwrap();
        assert_eq!(travel.to.id, "port-est");
        assert_eq!(travel.duration_min, MAX_TRAVEL_MINUTES);
        assert_eq!(travel.reason, "Trajet vers Port Est");
        assert!(parse_pending_travel(&json!({"durationMin": 3})).is_err());
    }

    #[test]
    fn test_pending_access_clamps_attempts() {
        let access = parse_pending_access(&json!({
            "target": "Tour Noire",
            "acceptedAnswers": ["Corbeau"],
            "attempts": 12,
            "maxAttempts": 0
        }))
        .unwrap();
        assert_eq!(access.max_attempts, 1);
        assert_eq!(access.attempts, 1);
        assert_eq!(access.accepted_answers, vec!["corbeau".to_string()]);
    }

    #[test]
    fn test_memory_entry_repairs_decay_data() {
        let entry = parse_memory_entry(&json!({
            "id": "e1",
            "label": "Garde",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "data": {"interestScore": 50.0, "ttlGameHours": -1, "expiresAtGameMin": 600}
        }))
        .unwrap();
        assert_eq!(entry.data.interest_score, MAX_INTEREST);
        assert_eq!(entry.data.ttl_game_hours, 1.0);
        assert_eq!(entry.data.expires_at_game_min, 600);
        assert!(parse_memory_entry(&json!({"label": "Garde"})).is_err());
    }
}
