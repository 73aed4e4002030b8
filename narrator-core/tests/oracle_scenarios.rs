//! Scenario tests with a scripted narrative oracle.
//!
//! Run with: `cargo test -p narrator-core --test oracle_scenarios`

use narrator_core::narration::OraclePurpose;
use narrator_core::testing::{assert_location, assert_unchanged, TestHarness};
use narrator_core::text::normalize;
use narrator_core::tools::CallOrigin;
use narrator_core::world::SessionPlace;
use narrator_core::{EngineConfig, OracleError, TurnOutcome};
use serde_json::json;

fn mentions_arrival(text: &str) -> bool {
    let text = normalize(text);
    ["tu arrives", "vous arrivez", "tu es arrive"]
        .iter()
        .any(|p| text.contains(p))
}

/// A harness with a travel proposal to Port Est outstanding.
async fn proposal_harness() -> TestHarness {
    let mut harness = TestHarness::with_oracle();
    harness
        .declare_place(SessionPlace::from_label("Port Est").with_travel_minutes(3))
        .await;
    let proposal = harness.send("Je vais au Port Est.").await;
    assert!(proposal.world_state.conversation.pending_travel.is_some());
    harness
}

// =============================================================================
// Continuity
// =============================================================================

#[tokio::test]
async fn test_premature_arrival_is_regenerated() {
    let mut harness = proposal_harness().await;
    harness
        .expect_reply(json!({"scene": "Tu arrives au Port Est, les mouettes crient."}))
        .expect_reply(json!({"scene": "Le cocher attend ton signal pour partir."}));

    let response = harness.send("Je regarde le cocher.").await;
    let report = response.diagnostics.continuity.clone().expect("guard ran");
    assert!(report.regenerated);
    assert!(!report.fallback_used);
    assert_eq!(report.attempts, 2);
    assert!(!mentions_arrival(&response.reply));
    assert!(response.reply.contains("cocher"));
    assert_location(&response, "Place du Marché");
    assert!(response.world_state.conversation.pending_travel.is_some());
}

#[tokio::test]
async fn test_repeated_arrival_falls_back() {
    let mut harness = proposal_harness().await;
    harness
        .expect_reply(json!({"scene": "Tu arrives au Port Est."}))
        .expect_reply(json!({"scene": "Vous arrivez enfin sur les quais."}));

    let response = harness.send("Je regarde le cocher.").await;
    let report = response.diagnostics.continuity.clone().expect("guard ran");
    assert!(report.fallback_used);
    assert_eq!(report.violations.len(), 2);
    assert!(!mentions_arrival(&response.reply));
    assert!(response.world_state.conversation.pending_travel.is_some());
    assert_eq!(
        harness.oracle().purposes()[harness.oracle().call_count() - 2..],
        [OraclePurpose::Narrate, OraclePurpose::Regenerate]
    );
}

#[tokio::test]
async fn test_oracle_outage_degrades_to_local_reply() {
    let mut harness = TestHarness::with_oracle();
    harness.oracle().push_error(OracleError::Timeout);

    let response = harness.send("Je regarde les étals.").await;
    assert!(!response.reply.trim().is_empty());
    assert!(response.diagnostics.degraded());
    assert!(response.diagnostics.oracle_errors[0].starts_with("narrate"));
    assert_eq!(response.diagnostics.outcome, TurnOutcome::Narrated);
}

// =============================================================================
// Tools
// =============================================================================

#[tokio::test]
async fn test_duplicate_lore_call_runs_once() {
    let message = "Qui tient les quais du Port Est ?";
    let mut harness = TestHarness::with_oracle();
    harness.expect_reply(json!({
        "responseType": "lore",
        "directAnswer": "La guilde des marchands tient les quais.",
        "toolCalls": [{"name": "query_lore", "args": {"query": message}}],
    }));

    let response = harness.send(message).await;
    let lore_calls: Vec<_> = response
        .tool_trace
        .iter()
        .filter(|t| t.tool == "query_lore")
        .collect();
    assert_eq!(lore_calls.len(), 1);
    assert_eq!(lore_calls[0].origin, CallOrigin::Policy);
    assert_eq!(response.diagnostics.tool_calls_deduplicated, 1);
    assert_unchanged(&response);
}

#[tokio::test]
async fn test_write_tools_dropped_on_informative_turn() {
    let mut harness = TestHarness::with_oracle();
    harness.expect_reply(json!({
        "responseType": "lore",
        "directAnswer": "Personne ne le sait vraiment.",
        "toolCalls": [{
            "name": "session_db_write",
            "args": {"operations": [{"op": "upsert", "entity": "rumor", "label": "Trésor caché"}]}
        }],
    }));

    let response = harness.send("Où est caché le trésor ?").await;
    assert_eq!(response.diagnostics.tool_calls_dropped, 1);
    assert!(response.tool_trace.iter().all(|t| t.tool != "session_db_write"));
    assert!(harness.memory().await.is_empty());
    assert_unchanged(&response);
}

#[tokio::test]
async fn test_oracle_tools_trigger_refinement() {
    let mut harness = TestHarness::with_oracle();
    harness
        .expect_reply_for(
            OraclePurpose::Narrate,
            json!({
                "scene": "Tu fouilles les étals du regard.",
                "toolCalls": [{"name": "get_world_state", "args": {}}],
            }),
        )
        .expect_reply_for(
            OraclePurpose::Refine,
            json!({"scene": "Entre deux étals, un vendeur d'épices te fait signe."}),
        );

    let response = harness.send("Je regarde les étals.").await;
    assert!(response.reply.contains("épices"));
    assert!(response
        .tool_trace
        .iter()
        .any(|t| t.tool == "get_world_state" && t.origin == CallOrigin::Oracle));
    assert_eq!(
        harness.oracle().purposes(),
        vec![OraclePurpose::Narrate, OraclePurpose::Refine]
    );
}

// =============================================================================
// Director arbitration and budget
// =============================================================================

#[tokio::test]
async fn test_bypass_ignored_for_forced_runtime() {
    let mut harness = TestHarness::with_oracle();
    harness.expect_reply(json!({
        "responseType": "status",
        "scene": "Rien ne bouge.",
        "bypassExistingMechanics": true,
    }));

    let response = harness.send("Je parle au garde.").await;
    assert!(!response.diagnostics.bypass_honored);
    assert_eq!(
        response.world_state.conversation.active_interlocutor.as_deref(),
        Some("Garde")
    );
}

#[tokio::test]
async fn test_bypass_honored_for_exploration_status() {
    let mut harness = TestHarness::with_oracle();
    harness.expect_reply(json!({
        "responseType": "status",
        "directAnswer": "Il est huit heures, la place s'éveille.",
        "bypassExistingMechanics": true,
    }));

    let response = harness.send("Le marché est calme ce matin.").await;
    assert!(response.diagnostics.bypass_honored);
    assert_unchanged(&response);
    assert!(response.world_state.history.is_empty());
}

#[tokio::test]
async fn test_budget_caps_oracle_calls() {
    let config = EngineConfig::new().with_budget(1, 1, 0);
    let mut harness = TestHarness::with_config(config, true);
    harness
        .declare_place(SessionPlace::from_label("Port Est").with_travel_minutes(3))
        .await;
    harness.send("Je vais au Port Est.").await;
    let calls_before = harness.oracle().call_count();
    harness
        .expect_reply(json!({"scene": "Tu arrives au Port Est."}))
        .expect_reply(json!({"scene": "never asked"}));

    let response = harness.send("Je regarde le cocher.").await;
    assert_eq!(harness.oracle().call_count(), calls_before + 1);
    assert_eq!(response.diagnostics.budget.used, 1);
    assert!(response
        .diagnostics
        .budget
        .blocked
        .iter()
        .any(|label| label == "regenerate"));
    let report = response.diagnostics.continuity.expect("guard ran");
    assert!(report.fallback_used);
    assert!(!mentions_arrival(&response.reply));
}
