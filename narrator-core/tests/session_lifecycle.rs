//! Persistence, memory decay and world bounds across many turns.
//!
//! Run with: `cargo test -p narrator-core --test session_lifecycle`

use narrator_core::intent::IntentType;
use narrator_core::memory::{EntityKind, MemoryOp, SessionMemory, UpsertOp};
use narrator_core::testing::{assert_reply_contains, TestHarness};
use narrator_core::world::{
    apply_travel, apply_world_delta, LocationRef, SessionPlace, TransitionMeta, TravelRequest,
    WorldDelta, MAX_TRAVEL_MINUTES, REPUTATION_RANGE, TENSION_RANGE,
};
use narrator_core::{EngineConfig, JsonFileStore, TurnEngine, TurnRequest, WorldState};
use chrono::Utc;
use tempfile::TempDir;

// =============================================================================
// Memory decay
// =============================================================================

#[tokio::test]
async fn test_unvisited_npc_forgotten_after_ttl() {
    let mut harness = TestHarness::new();
    let start = harness.world().await;

    let mut memory = SessionMemory::new(harness.session_id());
    memory.write(
        &[MemoryOp::Upsert(
            UpsertOp::new(EntityKind::Npc, "Garde").with_ttl_game_hours(24.0),
        )],
        &start,
        Utc::now(),
    );
    assert_eq!(memory.entries(EntityKind::Npc).len(), 1);
    harness.seed_memory(&memory).await;

    let mut later = start.clone();
    later.time = later.time.advanced(30 * 60);
    harness.seed_world(&later).await;

    let response = harness.send("/memory").await;
    assert_reply_contains(&response, "Aucun souvenir");
    assert!(harness.memory().await.entries(EntityKind::Npc).is_empty());
}

#[tokio::test]
async fn test_recent_npc_still_listed() {
    let mut harness = TestHarness::new();
    harness.send("Je parle au garde.").await;

    let response = harness.send("/memory").await;
    assert_reply_contains(&response, "Garde");
}

// =============================================================================
// World bounds
// =============================================================================

#[test]
fn test_metrics_stay_in_range_and_time_never_rewinds() {
    let deltas = [
        (150, 90),
        (-400, -400),
        (37, 250),
        (-1, 3),
        (500, -20),
        (-99, 99),
    ];
    let mut world = WorldState::new("s1", "Place du Marché");
    for round in 0..20 {
        let (rep, tension) = deltas[round % deltas.len()];
        let before = world.now_game_min();
        world = apply_world_delta(
            &world,
            &WorldDelta::new(rep, tension, "épreuve"),
            &TransitionMeta::new(IntentType::StoryAction),
        );
        let m = &world.metrics;
        assert!((REPUTATION_RANGE.0..=REPUTATION_RANGE.1).contains(&m.reputation));
        assert!((TENSION_RANGE.0..=TENSION_RANGE.1).contains(&m.local_tension));
        assert!(world.now_game_min() >= before);
    }
}

#[test]
fn test_travel_duration_is_capped() {
    let world = WorldState::new("s1", "Place du Marché");
    let before = world.now_game_min();
    let next = apply_travel(
        &world,
        &TravelRequest {
            from: world.location.clone(),
            to: LocationRef::from_label("Col des Brumes"),
            duration_min: u32::MAX,
            reason: "expédition".to_string(),
        },
    );
    assert_eq!(next.location.label, "Col des Brumes");
    assert_eq!(next.now_game_min() - before, i64::from(MAX_TRAVEL_MINUTES));
    assert!(next.conversation.pending_travel.is_none());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_pending_travel_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::new().with_data_dir(dir.path());

    let first = TurnEngine::from_config(config.clone()).unwrap();
    let proposal = first
        .process_turn(TurnRequest::new("s1", "Je vais au Port Est."))
        .await;
    assert!(proposal.world_state.conversation.pending_travel.is_some());
    assert!(proposal.diagnostics.storage_errors.is_empty());
    drop(first);

    let second = TurnEngine::from_config(config).unwrap();
    let arrival = second.process_turn(TurnRequest::new("s1", "Oui")).await;
    assert_eq!(arrival.world_state.location.label, "Port Est");
    assert!(arrival.world_state.conversation.pending_travel.is_none());
    assert_eq!(arrival.world_state.revision, proposal.world_state.revision + 1);
}

#[tokio::test]
async fn test_corrupt_world_is_reported_and_left_alone() {
    let dir = TempDir::new().unwrap();
    let session_dir = JsonFileStore::new(dir.path()).session_dir("s1");
    std::fs::create_dir_all(&session_dir).unwrap();
    let path = session_dir.join("world.json");
    std::fs::write(&path, "{ pas du json").unwrap();

    let engine = TurnEngine::from_config(EngineConfig::new().with_data_dir(dir.path())).unwrap();
    let response = engine
        .process_turn(TurnRequest::new("s1", "Je regarde autour de moi."))
        .await;

    assert!(!response.reply.trim().is_empty());
    assert!(response
        .diagnostics
        .storage_errors
        .iter()
        .any(|e| e.starts_with("load_world")));
    assert!(response.diagnostics.degraded());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ pas du json");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let mut harness = TestHarness::new();
    harness
        .declare_place(SessionPlace::from_label("Port Est").with_travel_minutes(3))
        .await;
    harness.send("Je vais au Port Est.").await;
    harness.send("Oui").await;

    let other = harness
        .engine()
        .process_turn(TurnRequest::new("autre-session", "/status"))
        .await;
    assert_eq!(other.world_state.location.label, "Place du Marché");
    assert_eq!(harness.world().await.location.label, "Port Est");
}
