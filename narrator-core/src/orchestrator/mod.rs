//! The turn pipeline.
//!
//! One player message goes through
//! `load → resolve gate → classify → plan → narrate → tools → refine →
//! continuity → commit → persist` and yields exactly one reply. The world
//! is only ever changed through the pure transition functions in
//! [`crate::world`], and each session document is written once, at the end.
//!
//! # Example
//!
//! ```ignore
//! use narrator_core::{EngineConfig, TurnEngine, TurnRequest};
//!
//! let engine = TurnEngine::from_config(EngineConfig::from_env())?;
//! let response = engine
//!     .process_turn(TurnRequest::new("session-1", "Je vais au Port Est."))
//!     .await;
//! println!("{}", response.reply);
//! ```

mod commands;
mod compose;
mod gates;
mod runtime;

pub use gates::{is_cancellation, is_confirmation, GateOutcome, ACCESS_DENIED_TENSION, ACCESS_GRANTED_TRAVEL_MIN};

use crate::budget::AiCallBudget;
use crate::catalog::{LoreLookup, RulesLookup, StaticLore, StaticRules};
use crate::config::EngineConfig;
use crate::continuity::{ContinuityContext, ContinuityGuard, OracleDriftValidator, Regeneration};
use crate::diagnostics::{TurnDiagnostics, TurnOutcome};
use crate::director::{arbitrate, plan_turn, DirectorPlan, ShortCircuit};
use crate::error::{EngineError, OracleError};
use crate::intent::{
    infer_commitment, ClassifierSource, ClassifierStrategy, Commitment, HeuristicClassifier, Intent,
    OracleClassifier,
};
use crate::memory::{
    EntityKind, MemoryOp, ReadQuery, SessionMemory, UpsertOp, FACT_OBSERVATION_WEIGHT,
    NPC_OBSERVATION_WEIGHT, PLACE_OBSERVATION_WEIGHT,
};
use crate::narration::{
    call_budgeted, HttpNarrativeOracle, NarrativeDraft, NarrativeOracle, OracleCall, OraclePurpose,
};
use crate::persist::{DocumentStore, JsonFileStore, SessionLocks};
use crate::profile::CharacterProfile;
use crate::sanitize::parse_narrative_draft;
use crate::text::truncate_chars;
use crate::tools::{CallOrigin, ToolBus, ToolCall, ToolContext, ToolRegistry, ToolTraceEntry};
use crate::world::{
    apply_critical_mutation, mark_intro_delivered, CriticalPatch, LocationRef, Patch, ReplyFragments,
    WorldState,
};
use chrono::{DateTime, Utc};
use commands::{run_command, SystemCommand};
use compose::NarrationInput;
use runtime::RuntimeStep;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

const SCENE_MEMORY_ROWS: usize = 5;
const LORE_HINTS: usize = 3;
const MAX_TICK_REASON_CHARS: usize = 160;

// =============================================================================
// Request / response
// =============================================================================

/// How the player is speaking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// In-character play.
    #[default]
    Roleplay,
    /// Questions about the game itself; never mutates the world.
    OutOfCharacter,
}

/// One player message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub character_profile: Option<CharacterProfile>,
    #[serde(default)]
    pub conversation_mode: ConversationMode,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            character_profile: None,
            conversation_mode: ConversationMode::default(),
        }
    }

    pub fn with_profile(mut self, profile: CharacterProfile) -> Self {
        self.character_profile = Some(profile);
        self
    }

    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.conversation_mode = mode;
        self
    }
}

/// The reply to one player message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    /// Rendered text shown to the player.
    pub reply: String,
    pub structured_reply: NarrativeDraft,
    pub intent: Intent,
    pub director: Option<DirectorPlan>,
    pub world_state: WorldState,
    /// Whether the turn changed the world or session memory.
    pub state_updated: bool,
    pub tool_trace: Vec<ToolTraceEntry>,
    pub diagnostics: TurnDiagnostics,
}

// =============================================================================
// Engine
// =============================================================================

/// Processes turns against a document store, with an optional oracle.
///
/// Turns on the same session are serialized; turns on different sessions
/// run independently.
pub struct TurnEngine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    oracle: Option<Arc<dyn NarrativeOracle>>,
    classifier: Box<dyn ClassifierStrategy>,
    guard: ContinuityGuard,
    tools: ToolBus,
    lore: Arc<dyn LoreLookup>,
    rules: Arc<dyn RulesLookup>,
    locks: SessionLocks,
}

/// Builder for [`TurnEngine`].
pub struct TurnEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn DocumentStore>>,
    oracle: Option<Arc<dyn NarrativeOracle>>,
    lore: Option<Arc<dyn LoreLookup>>,
    rules: Option<Arc<dyn RulesLookup>>,
    registry: Option<ToolRegistry>,
}

impl TurnEngineBuilder {
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn NarrativeOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_lore(mut self, lore: Arc<dyn LoreLookup>) -> Self {
        self.lore = Some(lore);
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RulesLookup>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_tool_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> TurnEngine {
        let config = self.config.normalized();

        let classifier: Box<dyn ClassifierStrategy> = match &self.oracle {
            Some(oracle) if config.classifier.oracle_assist => Box::new(OracleClassifier::new(
                Arc::clone(oracle),
                config.classifier.threshold,
            )),
            _ => Box::new(HeuristicClassifier),
        };
        let guard = match &self.oracle {
            Some(oracle) if config.continuity.oracle_check => {
                ContinuityGuard::new(Arc::new(OracleDriftValidator::new(Arc::clone(oracle))))
            }
            _ => ContinuityGuard::default(),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(JsonFileStore::new(config.data_dir.clone())));

        TurnEngine {
            store,
            oracle: self.oracle,
            classifier,
            guard,
            tools: ToolBus::new(self.registry.unwrap_or_else(ToolRegistry::standard)),
            lore: self.lore.unwrap_or_else(|| Arc::new(StaticLore::empty())),
            rules: self.rules.unwrap_or_else(|| Arc::new(StaticRules::empty())),
            locks: SessionLocks::new(),
            config,
        }
    }
}

/// Per-turn working set.
struct TurnState {
    world: WorldState,
    memory: SessionMemory,
    budget: AiCallBudget,
    diagnostics: TurnDiagnostics,
    profile: Option<CharacterProfile>,
    now: DateTime<Utc>,
}

/// What a pipeline branch settled on, before persistence.
struct Settled {
    world: WorldState,
    draft: NarrativeDraft,
    intent: Intent,
    director: Option<DirectorPlan>,
    state_updated: bool,
    tool_trace: Vec<ToolTraceEntry>,
}

impl TurnEngine {
    pub fn builder(config: EngineConfig) -> TurnEngineBuilder {
        TurnEngineBuilder {
            config,
            store: None,
            oracle: None,
            lore: None,
            rules: None,
            registry: None,
        }
    }

    /// File-backed engine, with the HTTP oracle when one is configured.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let config = config.normalized();
        let mut builder = Self::builder(config.clone())
            .with_store(Arc::new(JsonFileStore::new(config.data_dir.clone())));
        if let Some(oracle) = HttpNarrativeOracle::from_config(&config)? {
            builder = builder.with_oracle(Arc::new(oracle));
        }
        Ok(builder.build())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn tools(&self) -> &ToolBus {
        &self.tools
    }

    /// Process one player message. Never fails: oracle and storage
    /// problems degrade to deterministic replies and are reported in
    /// [`TurnResponse::diagnostics`].
    pub async fn process_turn(&self, request: TurnRequest) -> TurnResponse {
        let turn_id = Uuid::new_v4().to_string();
        let span = info_span!("turn", session = %request.session_id, turn_id = %turn_id);
        self.run_turn(request, turn_id).instrument(span).await
    }

    async fn run_turn(&self, request: TurnRequest, turn_id: String) -> TurnResponse {
        let _lock = self.locks.acquire(&request.session_id).await;
        let now = Utc::now();
        let budget = AiCallBudget::new(self.config.budget);
        let mut diagnostics = TurnDiagnostics::new(turn_id, budget.clone());

        let loaded = self.load_session(&request.session_id, &mut diagnostics).await;
        let (world, mut memory) = (loaded.world, loaded.memory);
        let swept = memory.sweep(world.now_game_min(), now);
        if swept > 0 {
            debug!(swept, "expired memory entries evicted");
        }

        let profile = request
            .character_profile
            .clone()
            .or_else(|| world.start_context.character.clone());
        let intro = (!world.start_context.intro_delivered)
            .then(|| compose::intro(&world, profile.as_ref()));
        let world = mark_intro_delivered(&world, profile.as_ref());

        let mut turn = TurnState {
            world,
            memory,
            budget,
            diagnostics,
            profile,
            now,
        };
        let message = request.message.trim();

        let settled = if message.starts_with('/') {
            self.command_turn(message, &mut turn)
        } else if let Some(resolution) = settle_gate(&turn.world, message) {
            self.gate_turn(message, resolution, &mut turn)
        } else {
            self.narrated_turn(message, request.conversation_mode, &mut turn)
                .await
        };

        let mut world = settled.world;
        if settled.state_updated {
            world.revision += 1;
        }
        world.updated_at = now;

        if loaded.world_ok {
            if let Err(e) = self.store.save_world(&world).await {
                turn.diagnostics.storage_error("save_world", e);
            }
        } else {
            warn!("world document unreadable, not overwriting it");
        }
        if loaded.memory_ok {
            if let Err(e) = self.store.save_memory(&turn.memory).await {
                turn.diagnostics.storage_error("save_memory", e);
            }
        } else {
            warn!("memory document unreadable, not overwriting it");
        }

        let mut reply = compose::render(&settled.draft);
        if let Some(intro) = intro {
            reply = if reply.is_empty() { intro } else { format!("{intro}\n\n{reply}") };
        }

        let mut diagnostics = turn.diagnostics;
        diagnostics.budget = turn.budget;
        info!(
            outcome = ?diagnostics.outcome,
            state_updated = settled.state_updated,
            oracle_calls = diagnostics.budget.used,
            degraded = diagnostics.degraded(),
            "turn complete"
        );

        TurnResponse {
            reply,
            structured_reply: settled.draft,
            intent: settled.intent,
            director: settled.director,
            world_state: world,
            state_updated: settled.state_updated,
            tool_trace: settled.tool_trace,
            diagnostics,
        }
    }

    async fn load_session(&self, session_id: &str, diagnostics: &mut TurnDiagnostics) -> Loaded {
        let fresh_world = || WorldState::new(session_id, &self.config.start_location_label);
        let (world, world_ok) = match self.store.load_world(session_id).await {
            Ok(Some(world)) => (world, true),
            Ok(None) => (fresh_world(), true),
            Err(e) => {
                diagnostics.storage_error("load_world", e);
                (fresh_world(), false)
            }
        };
        let (memory, memory_ok) = match self.store.load_memory(session_id).await {
            Ok(Some(memory)) => (memory, true),
            Ok(None) => (SessionMemory::new(session_id), true),
            Err(e) => {
                diagnostics.storage_error("load_memory", e);
                (SessionMemory::new(session_id), false)
            }
        };
        Loaded {
            world,
            memory,
            world_ok,
            memory_ok,
        }
    }

    // =========================================================================
    // Branches
    // =========================================================================

    fn command_turn(&self, message: &str, turn: &mut TurnState) -> Settled {
        let intent = HeuristicClassifier.classify(message, &turn.world);
        turn.diagnostics.classifier_source = Some(ClassifierSource::Heuristic);
        turn.diagnostics.outcome = TurnOutcome::SystemCommand;

        let command = SystemCommand::parse(message);
        debug!(command = ?command, "system command");
        let out = run_command(
            &command,
            &turn.world,
            &mut turn.memory,
            &self.config.start_location_label,
            turn.now,
        );
        Settled {
            director: Some(plan_turn(&intent, &out.world)),
            world: out.world,
            draft: out.draft,
            intent,
            state_updated: out.reset,
            tool_trace: Vec::new(),
        }
    }

    fn gate_turn(&self, message: &str, resolution: gates::GateResolution, turn: &mut TurnState) -> Settled {
        let intent = HeuristicClassifier.classify(message, &turn.world);
        turn.diagnostics.classifier_source = Some(ClassifierSource::Heuristic);
        turn.diagnostics.outcome = TurnOutcome::Gate(resolution.outcome);
        info!(outcome = ?resolution.outcome, "pending gate resolved");

        let world = commit_fragments(&resolution.world, &resolution.draft, false);
        if let Some(arrival) = &resolution.arrival {
            record_arrival(&mut turn.memory, &world, arrival, turn.now);
        }
        Settled {
            world,
            draft: resolution.draft,
            intent,
            director: None,
            state_updated: true,
            tool_trace: Vec::new(),
        }
    }

    async fn narrated_turn(&self, message: &str, mode: ConversationMode, turn: &mut TurnState) -> Settled {
        let world = turn.world.clone();

        // Classify and plan.
        let classification = self.classifier.classify(message, &world, &mut turn.budget).await;
        turn.diagnostics.classifier_source = Some(classification.source);
        if let Some(error) = &classification.oracle_error {
            turn.diagnostics.oracle_error("classify", error);
        }
        let mut intent = classification.intent;
        if mode == ConversationMode::OutOfCharacter {
            intent.commitment = Commitment::Informatif;
        }
        let mut plan = plan_turn(&intent, &world);

        let informative = match plan.short_circuit {
            None => false,
            Some(ShortCircuit::Informative) => true,
            Some(reason) => {
                info!(reason = ?reason, "turn short-circuited to clarification");
                turn.diagnostics.outcome = TurnOutcome::Clarification(reason);
                return Settled {
                    draft: compose::clarification(reason, &intent, &world),
                    world,
                    intent,
                    director: Some(plan),
                    state_updated: false,
                    tool_trace: Vec::new(),
                };
            }
        };

        let mut step = (plan.apply_runtime && !informative)
            .then(|| runtime::plan_step(&intent, message, &world, &self.config));
        let mut proposed = propose(&world, step.as_ref(), &intent);

        // Narrate.
        let scene_memory = turn.memory.read(
            &ReadQuery::scene().limit(SCENE_MEMORY_ROWS),
            &proposed,
            turn.now,
        );
        let lore_hints = json!(self.lore.query(message, LORE_HINTS));
        let specs = self.tools.registry().specs();
        let narration = compose::narration_context(&NarrationInput {
            message,
            intent: &intent,
            plan: &plan,
            world: &proposed,
            step: step.as_ref(),
            profile: turn.profile.as_ref(),
            scene_memory: &scene_memory,
            lore_hints: &lore_hints,
            tools: &specs,
        });
        let mut oracle_draft = match &self.oracle {
            Some(oracle) => {
                self.ask_oracle(oracle.as_ref(), OraclePurpose::Narrate, &narration, turn)
                    .await
            }
            None => None,
        };

        // Let the oracle steer an exploration turn, or bypass the runtime.
        if let Some(draft) = &oracle_draft {
            if plan.apply_runtime && !plan.forced_runtime && !informative {
                if let Some(world_step) =
                    runtime::step_from_world_intent(&draft.world_intent, &world, &self.config)
                {
                    debug!(step = ?world_step, "oracle world intent adopted");
                    proposed = propose(&world, Some(&world_step), &intent);
                    step = Some(world_step);
                }
            }
            if arbitrate(&mut plan, draft, &world) {
                info!(response_type = ?draft.response_type, "oracle bypass honored");
                turn.diagnostics.bypass_honored = true;
                step = None;
                proposed = world.clone();
            }
        }
        let mutating = step.as_ref().is_some_and(RuntimeStep::mutates);

        // Tools.
        let mut calls = policy_calls(&plan, &intent, message, informative, mutating);
        if let Some(draft) = &oracle_draft {
            for call in &draft.tool_calls {
                let writes = self
                    .tools
                    .registry()
                    .get(&call.name)
                    .is_some_and(|tool| !tool.spec().read_only);
                if writes && !mutating {
                    debug!(tool = %call.name, "write tool dropped on a non-mutating turn");
                    turn.diagnostics.tool_calls_dropped += 1;
                    continue;
                }
                calls.push(ToolCall {
                    origin: CallOrigin::Oracle,
                    ..call.clone()
                });
            }
        }
        let run = {
            let mut ctx = ToolContext {
                world: &proposed,
                memory: &mut turn.memory,
                lore: self.lore.as_ref(),
                rules: self.rules.as_ref(),
                profile: turn.profile.as_ref(),
                now: turn.now,
            };
            self.tools.execute_tool_calls(&calls, &mut ctx)
        };
        turn.diagnostics.tool_calls_deduplicated = run.deduplicated;
        let memory_changed = run.wrote_memory;

        // Refine once the oracle's own tool calls have results.
        let oracle_tools_ran = run.trace.iter().any(|t| t.origin == CallOrigin::Oracle);
        let refinement = match (&self.oracle, &oracle_draft) {
            (Some(oracle), Some(draft)) if oracle_tools_ran => Some((
                Arc::clone(oracle),
                compose::refine_context(&narration, draft, &run.trace),
            )),
            _ => None,
        };
        if let Some((oracle, context)) = refinement {
            if let Some(refined) = self
                .ask_oracle(oracle.as_ref(), OraclePurpose::Refine, &context, turn)
                .await
            {
                oracle_draft = Some(refined);
            }
        }

        let from_oracle = oracle_draft.is_some();
        let draft = oracle_draft
            .unwrap_or_else(|| compose::deterministic_draft(&plan, step.as_ref(), &proposed, &run.trace));
        let state_updated = mutating || memory_changed;

        // Continuity.
        let outcome = {
            let ctx = ContinuityContext::for_world(&proposed, state_updated);
            let regeneration = match &self.oracle {
                Some(oracle) if from_oracle => Some(Regeneration {
                    oracle: oracle.as_ref(),
                    context: &narration,
                }),
                _ => None,
            };
            self.guard
                .settle(
                    draft,
                    &ctx,
                    &proposed.conversation.last_valid_reply,
                    regeneration,
                    &mut turn.budget,
                )
                .await
        };

        // Commit.
        let mut committed = commit_fragments(&proposed, &outcome.draft, outcome.report.fallback_used);
        if mutating {
            committed = record_consequences(&committed, &outcome.draft);
            record_observations(&mut turn.memory, &committed, &outcome.draft, turn.now);
        }

        turn.diagnostics.outcome = match &step {
            _ if informative => TurnOutcome::Answered,
            Some(RuntimeStep::Hold(_)) => TurnOutcome::Held,
            Some(_) => TurnOutcome::Narrated,
            None => TurnOutcome::Answered,
        };
        turn.diagnostics.continuity = Some(outcome.report);

        Settled {
            world: committed,
            draft: outcome.draft,
            intent,
            director: Some(plan),
            state_updated,
            tool_trace: run.trace,
        }
    }

    /// Budgeted oracle call parsed into a draft. Failures are recorded and
    /// yield `None`.
    async fn ask_oracle(
        &self,
        oracle: &dyn NarrativeOracle,
        purpose: OraclePurpose,
        context: &Value,
        turn: &mut TurnState,
    ) -> Option<NarrativeDraft> {
        let call = OracleCall::new(purpose, context.clone());
        let parsed = call_budgeted(oracle, &mut turn.budget, &call)
            .await
            .and_then(|value| {
                parse_narrative_draft(&value).map_err(|e| OracleError::InvalidResponse(e.to_string()))
            });
        match parsed {
            Ok(draft) if !draft.is_empty() => Some(draft),
            Ok(_) => {
                turn.diagnostics.oracle_error(purpose.label(), "empty reply");
                None
            }
            Err(e) => {
                turn.diagnostics.oracle_error(purpose.label(), e);
                None
            }
        }
    }
}

struct Loaded {
    world: WorldState,
    memory: SessionMemory,
    /// The stored document was read (or absent) without error.
    world_ok: bool,
    memory_ok: bool,
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve the outstanding gate, unless the message only wonders aloud.
fn settle_gate(world: &WorldState, message: &str) -> Option<gates::GateResolution> {
    if infer_commitment(message) == Commitment::Hypothetique {
        if world.has_pending_gate() {
            debug!("hypothetical message leaves the pending gate untouched");
        }
        return None;
    }
    gates::resolve_pending_gate(world, message)
}

fn propose(world: &WorldState, step: Option<&RuntimeStep>, intent: &Intent) -> WorldState {
    match step {
        Some(step) => runtime::apply_step(world, step, intent.intent_type),
        None => world.clone(),
    }
}

/// Deterministic calls the engine always makes for a turn.
fn policy_calls(
    plan: &DirectorPlan,
    intent: &Intent,
    message: &str,
    informative: bool,
    mutating: bool,
) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    if plan.mode == crate::director::DirectorMode::Lore || informative {
        calls.push(ToolCall::policy("query_lore", json!({ "query": message })));
    }
    calls.push(ToolCall::policy(
        "session_db_read",
        json!({ "scope": "scene-memory", "limit": SCENE_MEMORY_ROWS }),
    ));
    if intent.requires_check {
        calls.push(ToolCall::policy("query_rules", json!({ "query": message })));
    }
    if mutating {
        calls.push(ToolCall::policy(
            "quest_trama_tick",
            json!({ "reason": truncate_chars(message, MAX_TICK_REASON_CHARS) }),
        ));
    }
    calls
}

/// Remember the reply fragments unless they came from the fallback.
fn commit_fragments(world: &WorldState, draft: &NarrativeDraft, fallback_used: bool) -> WorldState {
    let fragments = ReplyFragments {
        scene: draft.scene.clone(),
        action_result: draft.action_result.clone(),
        consequences: draft.consequences.clone(),
    };
    if fallback_used || fragments.is_empty() {
        return world.clone();
    }
    apply_critical_mutation(
        world,
        &CriticalPatch {
            last_valid_reply: Patch::Set(fragments),
            ..Default::default()
        },
    )
}

fn record_consequences(world: &WorldState, draft: &NarrativeDraft) -> WorldState {
    if draft.consequences.is_empty() {
        return world.clone();
    }
    let mut frame = world.conversation.scene_frame.clone();
    for consequence in &draft.consequences {
        frame.push_fact(consequence);
    }
    apply_critical_mutation(
        world,
        &CriticalPatch {
            scene_frame: Patch::Set(frame),
            ..Default::default()
        },
    )
}

fn record_observations(
    memory: &mut SessionMemory,
    world: &WorldState,
    draft: &NarrativeDraft,
    now: DateTime<Utc>,
) {
    let here = &world.location;
    let mut ops = Vec::new();
    if let Some(interlocutor) = &world.conversation.active_interlocutor {
        ops.push(MemoryOp::Upsert(
            UpsertOp::new(EntityKind::Npc, interlocutor.clone())
                .with_source("observation")
                .with_weight(NPC_OBSERVATION_WEIGHT)
                .at_location(here.id.clone(), here.label.clone()),
        ));
    }
    for consequence in &draft.consequences {
        ops.push(MemoryOp::Upsert(
            UpsertOp::new(EntityKind::Fact, consequence.clone())
                .with_source("observation")
                .with_weight(FACT_OBSERVATION_WEIGHT)
                .at_location(here.id.clone(), here.label.clone()),
        ));
    }
    if ops.is_empty() {
        return;
    }
    let report = memory.write(&ops, world, now);
    debug!(applied = report.applied.len(), evicted = report.evicted, "observations recorded");
}

fn record_arrival(memory: &mut SessionMemory, world: &WorldState, arrival: &LocationRef, now: DateTime<Utc>) {
    let op = UpsertOp::new(EntityKind::Place, arrival.label.clone())
        .with_source("observation")
        .with_weight(PLACE_OBSERVATION_WEIGHT)
        .at_location(arrival.id.clone(), arrival.label.clone());
    memory.write(&[MemoryOp::Upsert(op)], world, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryStore;

    fn engine() -> TurnEngine {
        TurnEngine::builder(EngineConfig::new())
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
    }

    #[test]
    fn test_request_wire_format() {
        let request: TurnRequest = serde_json::from_value(json!({
            "sessionId": "s1",
            "message": "Bonjour",
            "conversationMode": "out_of_character",
        }))
        .unwrap();
        assert_eq!(request.conversation_mode, ConversationMode::OutOfCharacter);
        assert!(request.character_profile.is_none());
    }

    #[test]
    fn test_policy_calls() {
        let world = WorldState::new("s1", "Place du Marché");
        let intent = HeuristicClassifier.classify("Qui dirige la guilde ?", &world);
        let plan = plan_turn(&intent, &world);
        let calls = policy_calls(&plan, &intent, "Qui dirige la guilde ?", true, false);
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["query_lore", "session_db_read"]);
        assert!(calls.iter().all(|c| c.origin == CallOrigin::Policy));
    }

    #[tokio::test]
    async fn test_first_turn_delivers_intro_once() {
        let engine = engine();
        let profile = CharacterProfile::named("Lyra");
        let first = engine
            .process_turn(TurnRequest::new("s1", "Je regarde autour de moi.").with_profile(profile))
            .await;
        assert!(first.reply.starts_with("Bienvenue, Lyra."));
        assert!(first.world_state.start_context.intro_delivered);
        assert_eq!(first.world_state.player_name(), Some("Lyra"));

        let second = engine
            .process_turn(TurnRequest::new("s1", "Je regarde autour de moi."))
            .await;
        assert!(!second.reply.contains("Bienvenue"));
    }

    #[tokio::test]
    async fn test_out_of_character_never_mutates() {
        let engine = engine();
        let response = engine
            .process_turn(
                TurnRequest::new("s1", "J'attaque le garde.").with_mode(ConversationMode::OutOfCharacter),
            )
            .await;
        assert_eq!(response.intent.commitment, Commitment::Informatif);
        assert!(!response.state_updated);
        assert_eq!(response.diagnostics.outcome, TurnOutcome::Answered);
        assert_eq!(response.world_state.metrics.local_tension, 0);
    }

    #[tokio::test]
    async fn test_status_command_is_free() {
        let engine = engine();
        let response = engine.process_turn(TurnRequest::new("s1", "/status")).await;
        assert_eq!(response.diagnostics.outcome, TurnOutcome::SystemCommand);
        assert!(!response.state_updated);
        assert_eq!(response.diagnostics.budget.used, 0);
        assert_eq!(response.world_state.now_game_min(), WorldState::new("s1", "x").now_game_min());
        assert!(response.reply.contains("Place du Marché"));
    }
}
