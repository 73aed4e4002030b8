//! Testing utilities for the turn engine.
//!
//! This module provides tools for deterministic tests without network access:
//! - `ScriptedOracle`, a narrative oracle that replays queued replies
//! - `TestHarness`, an engine wired to an in-memory store and a scripted oracle
//! - Assertion helpers for turn responses

use crate::config::EngineConfig;
use crate::error::OracleError;
use crate::memory::SessionMemory;
use crate::narration::{NarrativeOracle, OracleCall, OraclePurpose};
use crate::orchestrator::{TurnEngine, TurnRequest, TurnResponse};
use crate::persist::{DocumentStore, InMemoryStore};
use crate::profile::CharacterProfile;
use crate::text::normalize;
use crate::world::{declare_place, SessionPlace, WorldState};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Reply = Result<Value, OracleError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An oracle that returns scripted replies.
///
/// Replies queued for a specific purpose are used first; otherwise the
/// shared queue answers in order. An empty queue answers
/// [`OracleError::Unavailable`], which the engine treats like any outage.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Reply>>,
    by_purpose: Mutex<HashMap<OraclePurpose, VecDeque<Reply>>>,
    calls: Mutex<Vec<OracleCall>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call of any purpose.
    pub fn push_reply(&self, reply: Value) {
        lock(&self.replies).push_back(Ok(reply));
    }

    /// Queue a failure for the next call of any purpose.
    pub fn push_error(&self, error: OracleError) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Queue a reply for the next call with `purpose`.
    pub fn push_reply_for(&self, purpose: OraclePurpose, reply: Value) {
        lock(&self.by_purpose)
            .entry(purpose)
            .or_default()
            .push_back(Ok(reply));
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Every call received, oldest first.
    pub fn calls(&self) -> Vec<OracleCall> {
        lock(&self.calls).clone()
    }

    /// Purposes of the calls received, oldest first.
    pub fn purposes(&self) -> Vec<OraclePurpose> {
        lock(&self.calls).iter().map(|c| c.purpose).collect()
    }

    fn next_reply(&self, purpose: OraclePurpose) -> Reply {
        if let Some(reply) = lock(&self.by_purpose)
            .get_mut(&purpose)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        lock(&self.replies)
            .pop_front()
            .unwrap_or(Err(OracleError::Unavailable))
    }
}

#[async_trait]
impl NarrativeOracle for ScriptedOracle {
    async fn call(&self, call: &OracleCall) -> Result<Value, OracleError> {
        lock(&self.calls).push(call.clone());
        self.next_reply(call.purpose)
    }
}

/// A turn engine on an in-memory store, for scripted scenarios.
///
/// Messages go to a single session. The oracle is attached only when built
/// with [`TestHarness::with_oracle`].
pub struct TestHarness {
    engine: TurnEngine,
    store: Arc<InMemoryStore>,
    oracle: Arc<ScriptedOracle>,
    session_id: String,
    profile: Option<CharacterProfile>,
    responses: Vec<TurnResponse>,
}

impl TestHarness {
    /// Heuristics only, default config.
    pub fn new() -> Self {
        Self::build(EngineConfig::new(), false)
    }

    /// Default config with a scripted oracle attached.
    pub fn with_oracle() -> Self {
        Self::build(EngineConfig::new(), true)
    }

    /// Custom config; `oracle` attaches the scripted oracle.
    pub fn with_config(config: EngineConfig, oracle: bool) -> Self {
        Self::build(config, oracle)
    }

    fn build(config: EngineConfig, attach_oracle: bool) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let oracle = Arc::new(ScriptedOracle::new());
        let mut builder = TurnEngine::builder(config).with_store(Arc::clone(&store) as Arc<dyn DocumentStore>);
        if attach_oracle {
            builder = builder.with_oracle(Arc::clone(&oracle) as Arc<dyn NarrativeOracle>);
        }
        Self {
            engine: builder.build(),
            store,
            oracle,
            session_id: "test-session".to_string(),
            profile: None,
            responses: Vec::new(),
        }
    }

    /// Use this character for every message.
    pub fn with_character(mut self, profile: CharacterProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn oracle(&self) -> &ScriptedOracle {
        &self.oracle
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue an oracle reply.
    pub fn expect_reply(&mut self, reply: Value) -> &mut Self {
        self.oracle.push_reply(reply);
        self
    }

    /// Queue an oracle reply for one purpose.
    pub fn expect_reply_for(&mut self, purpose: OraclePurpose, reply: Value) -> &mut Self {
        self.oracle.push_reply_for(purpose, reply);
        self
    }

    /// Send a message to the session.
    pub async fn send(&mut self, message: &str) -> TurnResponse {
        let mut request = TurnRequest::new(self.session_id.clone(), message);
        if let Some(profile) = &self.profile {
            request = request.with_profile(profile.clone());
        }
        let response = self.engine.process_turn(request).await;
        self.responses.push(response.clone());
        response
    }

    /// The persisted world, or a fresh one if nothing was saved yet.
    pub async fn world(&self) -> WorldState {
        match self.store.load_world(&self.session_id).await {
            Ok(Some(world)) => world,
            _ => WorldState::new(
                self.session_id.clone(),
                &self.engine.config().start_location_label,
            ),
        }
    }

    /// The persisted session memory, or an empty one.
    pub async fn memory(&self) -> SessionMemory {
        match self.store.load_memory(&self.session_id).await {
            Ok(Some(memory)) => memory,
            _ => SessionMemory::new(self.session_id.clone()),
        }
    }

    /// Overwrite the persisted world.
    pub async fn seed_world(&self, world: &WorldState) {
        if let Err(e) = self.store.save_world(world).await {
            tracing::warn!(error = %e, "seeding world failed");
        }
    }

    /// Overwrite the persisted memory.
    pub async fn seed_memory(&self, memory: &SessionMemory) {
        if let Err(e) = self.store.save_memory(memory).await {
            tracing::warn!(error = %e, "seeding memory failed");
        }
    }

    /// Register a place in the persisted world.
    pub async fn declare_place(&self, place: SessionPlace) {
        let world = declare_place(&self.world().await, place);
        self.seed_world(&world).await;
    }

    pub fn last_response(&self) -> Option<&TurnResponse> {
        self.responses.last()
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.responses.last().map(|r| r.reply.as_str())
    }

    pub fn turn_count(&self) -> usize {
        self.responses.len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion helpers
// =============================================================================

/// Assert the player stands at `label`.
#[track_caller]
pub fn assert_location(response: &TurnResponse, label: &str) {
    assert_eq!(
        normalize(&response.world_state.location.label),
        normalize(label),
        "expected location {label}, found {}",
        response.world_state.location.label
    );
}

/// Assert the turn did not touch the world.
#[track_caller]
pub fn assert_unchanged(response: &TurnResponse) {
    assert!(
        !response.state_updated,
        "expected no state update, outcome was {:?}",
        response.diagnostics.outcome
    );
}

/// Assert no gate is outstanding.
#[track_caller]
pub fn assert_no_pending(response: &TurnResponse) {
    let c = &response.world_state.conversation;
    assert!(
        !response.world_state.has_pending_gate(),
        "pending gates left: travel={:?} access={:?} action={:?}",
        c.pending_travel.as_ref().map(|t| &t.to.label),
        c.pending_access.as_ref().map(|a| &a.target.label),
        c.pending_action.as_ref().map(|a| &a.label)
    );
}

/// Assert the reply mentions `text`, ignoring case and accents.
#[track_caller]
pub fn assert_reply_contains(response: &TurnResponse, text: &str) {
    assert!(
        normalize(&response.reply).contains(&normalize(text)),
        "reply does not mention {text:?}: {}",
        response.reply
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::TurnOutcome;
    use crate::orchestrator::GateOutcome;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_oracle_order() {
        let oracle = ScriptedOracle::new();
        oracle.push_reply(json!({"n": 1}));
        oracle.push_reply_for(OraclePurpose::Classify, json!({"n": 2}));

        let narrate = OracleCall::new(OraclePurpose::Narrate, json!({}));
        let classify = OracleCall::new(OraclePurpose::Classify, json!({}));
        assert_eq!(oracle.call(&classify).await.unwrap(), json!({"n": 2}));
        assert_eq!(oracle.call(&narrate).await.unwrap(), json!({"n": 1}));
        assert!(matches!(oracle.call(&narrate).await, Err(OracleError::Unavailable)));
        assert_eq!(
            oracle.purposes(),
            vec![OraclePurpose::Classify, OraclePurpose::Narrate, OraclePurpose::Narrate]
        );
    }

    #[tokio::test]
    async fn test_harness_travel_flow() {
        let mut harness = TestHarness::new();
        harness
            .declare_place(SessionPlace::from_label("Port Est").with_travel_minutes(3))
            .await;

        let proposal = harness.send("Je vais au Port Est.").await;
        assert_location(&proposal, "Place du Marché");
        assert!(proposal.world_state.conversation.pending_travel.is_some());

        let arrival = harness.send("Oui, allons-y.").await;
        assert_eq!(arrival.diagnostics.outcome, TurnOutcome::Gate(GateOutcome::TravelConfirmed));
        assert_location(&arrival, "Port Est");
        assert_no_pending(&arrival);
        assert_eq!(harness.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_harness_oracle_narration() {
        let mut harness = TestHarness::with_oracle();
        harness.expect_reply(json!({
            "responseType": "narration",
            "scene": "La place bruisse de conversations.",
            "confidence": 0.8,
        }));
        let response = harness.send("Je regarde les étals.").await;
        assert_reply_contains(&response, "bruisse");
        assert_eq!(harness.oracle().purposes()[0], OraclePurpose::Narrate);
    }
}
