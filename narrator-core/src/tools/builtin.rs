//! The engine's fixed tool set.

use super::{ToolContext, ToolRegistry, TypedTool};
use crate::error::ToolError;
use crate::memory::{EntityKind, MemoryOp, ReadQuery, ReadScope, UpsertOp, MAX_READ_LIMIT};
use crate::profile::derive_rules_pack;
use crate::sanitize::{parse_entity_kind, parse_memory_op};
use crate::text::truncate_chars;
use narrator_macros::Tool;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Local tension at which the quest pressure starts spreading rumors.
pub const UNREST_TENSION_THRESHOLD: i32 = 40;

const CRISIS_TENSION_THRESHOLD: i32 = 70;
const DEFAULT_LOOKUP_LIMIT: usize = 5;
const MAX_LOOKUP_LIMIT: usize = 20;
const UNREST_RUMOR_WEIGHT: f64 = 0.2;

pub(super) fn register_all(registry: &mut ToolRegistry) {
    registry
        .register(TypedTool::<GetWorldState>::new(get_world_state))
        .register(TypedTool::<QueryLore>::new(query_lore))
        .register(TypedTool::<QueryRules>::new(query_rules))
        .register(TypedTool::<QueryPlayerSheet>::new(query_player_sheet))
        .register(TypedTool::<SessionDbRead>::new(session_db_read))
        .register(TypedTool::<SessionDbWrite>::new(session_db_write))
        .register(TypedTool::<QuestTramaTick>::new(quest_trama_tick));
}

fn lookup_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LOOKUP_LIMIT).clamp(1, MAX_LOOKUP_LIMIT)
}

// =============================================================================
// Read-only tools
// =============================================================================

/// Current time, place, metrics, narrative stage and scene frame.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "get_world_state", read_only)]
pub struct GetWorldState {}

fn get_world_state(_: GetWorldState, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    Ok(ctx.world.summary())
}

/// Search the world lore by keywords.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "query_lore", read_only)]
pub struct QueryLore {
    /// Keywords to look up
    pub query: String,
    /// Maximum number of records
    pub limit: Option<usize>,
}

fn query_lore(args: QueryLore, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let results = ctx.lore.query(&args.query, lookup_limit(args.limit));
    Ok(json!({ "query": args.query, "results": results }))
}

/// Search the rules text, with the player's rules pack attached.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "query_rules", read_only)]
pub struct QueryRules {
    /// Rule, skill or condition to look up
    pub query: String,
    /// Maximum number of records
    pub limit: Option<usize>,
}

fn query_rules(args: QueryRules, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let results = ctx.rules.query(&args.query, lookup_limit(args.limit));
    Ok(json!({
        "query": args.query,
        "results": results,
        "rulesPack": derive_rules_pack(ctx.profile),
    }))
}

/// The player's character sheet.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "query_player_sheet", read_only)]
pub struct QueryPlayerSheet {
    /// One sheet field, e.g. skills or traits
    pub section: Option<String>,
}

fn query_player_sheet(args: QueryPlayerSheet, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let rules_pack = derive_rules_pack(ctx.profile);
    let Some(section) = args.section.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(json!({ "profile": ctx.profile, "rulesPack": rules_pack }));
    };

    let sheet = serde_json::to_value(ctx.profile).unwrap_or(Value::Null);
    let value = sheet
        .get(section)
        .cloned()
        .or_else(|| serde_json::to_value(&rules_pack).ok()?.get(section).cloned())
        .unwrap_or(Value::Null);
    Ok(json!({ "section": section, "value": value }))
}

/// Read remembered places, characters, facts, rumors and debts.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "session_db_read", read_only)]
pub struct SessionDbRead {
    /// Entity kind: place, npc, fact, rumor or debt
    pub entity: Option<String>,
    /// Free-text filter
    pub query: Option<String>,
    /// Restrict to the current location
    #[tool(one_of = "all|scene-memory")]
    pub scope: Option<String>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

fn session_db_read(args: SessionDbRead, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let entity = match args.entity.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(raw) => Some(parse_entity_kind(raw).ok_or_else(|| ToolError::InvalidArgs {
            tool: "session_db_read".to_string(),
            reason: format!("unknown entity '{}'", raw),
        })?),
        None => None,
    };
    let scope = match args.scope.as_deref().map(str::trim) {
        Some("scene-memory") | Some("scene_memory") | Some("scene") => ReadScope::SceneMemory,
        _ => ReadScope::All,
    };

    let query = ReadQuery {
        entity,
        query: args.query,
        scope,
        limit: args.limit.map(|l| l.min(MAX_READ_LIMIT)),
    };
    let rows = ctx.memory.read(&query, ctx.world, ctx.now);
    Ok(json!({ "count": rows.len(), "rows": rows }))
}

// =============================================================================
// Writing tools
// =============================================================================

/// Upsert or delete memory entries.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "session_db_write")]
pub struct SessionDbWrite {
    /// Operations: {op, entity, label, text?, tags?, data?, ttlSeconds?}
    pub operations: Vec<Value>,
}

fn session_db_write(args: SessionDbWrite, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let mut ops = Vec::with_capacity(args.operations.len());
    let mut rejected = Vec::new();
    for (index, raw) in args.operations.iter().enumerate() {
        match parse_memory_op(raw) {
            Ok(op) => ops.push(op),
            Err(e) => rejected.push(json!({ "index": index, "reason": e.to_string() })),
        }
    }
    if ops.is_empty() {
        return Err(ToolError::InvalidArgs {
            tool: "session_db_write".to_string(),
            reason: "no valid operation".to_string(),
        });
    }

    let report = ctx.memory.write(&ops, ctx.world, ctx.now);
    Ok(json!({
        "applied": report.applied,
        "evicted": report.evicted,
        "rejected": rejected,
    }))
}

/// Advance the background quest pressure from local tension.
#[derive(Debug, Deserialize, Tool)]
#[tool(name = "quest_trama_tick")]
pub struct QuestTramaTick {
    /// What moved the plot forward
    pub reason: Option<String>,
}

fn quest_trama_tick(args: QuestTramaTick, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let pressure = ctx.world.metrics.local_tension;
    let stage = if pressure >= CRISIS_TENSION_THRESHOLD {
        "crise"
    } else if pressure >= UNREST_TENSION_THRESHOLD {
        "agitation"
    } else {
        "calme"
    };

    let mut rumor = None;
    if pressure >= UNREST_TENSION_THRESHOLD {
        let label = format!("Agitation à {}", ctx.world.location.label);
        let mut text = format!("La tension monte à {} ({}).", ctx.world.location.label, stage);
        if let Some(reason) = args.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            text.push_str(&format!(" {}", truncate_chars(reason, 160)));
        }
        let op = UpsertOp::new(EntityKind::Rumor, label.clone())
            .with_text(text)
            .with_source("quest_trama_tick")
            .with_weight(UNREST_RUMOR_WEIGHT);
        ctx.memory.write(&[MemoryOp::Upsert(op)], ctx.world, ctx.now);
        debug!(pressure, stage, "quest pressure rumor recorded");
        rumor = Some(label);
    }

    Ok(json!({ "pressure": pressure, "stage": stage, "rumor": rumor }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogRecord, StaticLore, StaticRules};
    use crate::memory::SessionMemory;
    use crate::profile::CharacterProfile;
    use crate::tools::{ToolBus, ToolCall};
    use crate::world::{apply_world_delta, TransitionMeta, WorldDelta, WorldState};
    use crate::intent::IntentType;
    use chrono::Utc;

    fn run(world: &WorldState, memory: &mut SessionMemory, call: ToolCall) -> Value {
        let lore = StaticLore::new(vec![CatalogRecord::new(
            "guilde",
            "Guilde des Marchands",
            "Elle tient le Port Est.",
        )]);
        let rules = StaticRules::new(vec![CatalogRecord::new(
            "discretion",
            "Discrétion",
            "Test de Dextérité contre la Perception passive.",
        )]);
        let profile = CharacterProfile::named("Aelys").with_level(5);
        let mut ctx = ToolContext {
            world,
            memory,
            lore: &lore,
            rules: &rules,
            profile: Some(&profile),
            now: Utc::now(),
        };
        let run = ToolBus::default().execute_tool_calls(&[call], &mut ctx);
        let entry = run.trace.into_iter().next().unwrap();
        assert!(entry.error.is_none(), "tool failed: {:?}", entry.error);
        entry.result.unwrap()
    }

    #[test]
    fn test_get_world_state() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let result = run(&world, &mut memory, ToolCall::policy("get_world_state", Value::Null));
        assert_eq!(result["location"]["label"], "Port Est");
        assert_eq!(result["narrativeStage"], "exploration");
    }

    #[test]
    fn test_query_rules_carries_rules_pack() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let result = run(
            &world,
            &mut memory,
            ToolCall::oracle("query_rules", json!({"query": "discretion"})),
        );
        assert_eq!(result["results"][0]["id"], "discretion");
        assert_eq!(result["rulesPack"]["proficiencyBonus"], 3);
    }

    #[test]
    fn test_player_sheet_section() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let result = run(
            &world,
            &mut memory,
            ToolCall::oracle("query_player_sheet", json!({"section": "name"})),
        );
        assert_eq!(result["value"], "Aelys");
        let result = run(
            &world,
            &mut memory,
            ToolCall::oracle("query_player_sheet", json!({"section": "proficiencyBonus"})),
        );
        assert_eq!(result["value"], 3);
    }

    #[test]
    fn test_session_db_read_rejects_unknown_entity() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let lore = StaticLore::empty();
        let rules = StaticRules::empty();
        let mut ctx = ToolContext {
            world: &world,
            memory: &mut memory,
            lore: &lore,
            rules: &rules,
            profile: None,
            now: Utc::now(),
        };
        let run = ToolBus::default().execute_tool_calls(
            &[ToolCall::oracle("session_db_read", json!({"entity": "dragon"}))],
            &mut ctx,
        );
        assert!(run.trace[0].error.as_deref().unwrap().contains("dragon"));
    }

    #[test]
    fn test_write_then_read_scene_memory() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let written = run(
            &world,
            &mut memory,
            ToolCall::oracle(
                "session_db_write",
                json!({"operations": [
                    {"op": "upsert", "entity": "pnj", "label": "Garde", "text": "Un garde bourru"},
                    {"op": "upsert", "entity": "nope", "label": "X"}
                ]}),
            ),
        );
        assert_eq!(written["applied"].as_array().unwrap().len(), 1);
        assert_eq!(written["rejected"][0]["index"], 1);

        let read = run(
            &world,
            &mut memory,
            ToolCall::oracle("session_db_read", json!({"scope": "scene-memory"})),
        );
        assert_eq!(read["count"], 1);
        assert_eq!(read["rows"][0]["label"], "Garde");
        assert_eq!(read["rows"][0]["entity"], "npc");
    }

    #[test]
    fn test_quest_tick_calm_writes_nothing() {
        let world = WorldState::new("s1", "Port Est");
        let mut memory = SessionMemory::new("s1");
        let result = run(&world, &mut memory, ToolCall::policy("quest_trama_tick", json!({})));
        assert_eq!(result["stage"], "calme");
        assert!(result["rumor"].is_null());
        assert!(memory.is_empty());
    }

    #[test]
    fn test_quest_tick_unrest_records_rumor() {
        let world = apply_world_delta(
            &WorldState::new("s1", "Port Est"),
            &WorldDelta::new(0, 45, "rixe"),
            &TransitionMeta::new(IntentType::StoryAction),
        );
        let mut memory = SessionMemory::new("s1");
        let result = run(&world, &mut memory, ToolCall::policy("quest_trama_tick", json!({})));
        assert_eq!(result["stage"], "agitation");
        assert_eq!(result["rumor"], "Agitation à Port Est");
        let rumors = memory.entries(EntityKind::Rumor);
        assert_eq!(rumors.len(), 1);
        assert_eq!(rumors[0].source, "quest_trama_tick");
    }
}
