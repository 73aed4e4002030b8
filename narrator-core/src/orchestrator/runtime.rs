//! The mutation a committed turn applies to the world.
//!
//! [`plan_step`] decides what the message asks for; [`apply_step`] turns
//! that into a new world through the pure transition functions. Planning
//! happens before narration so the reply is validated against the world
//! that will actually be persisted.

use crate::config::EngineConfig;
use crate::intent::{ActionKind, Intent, IntentType, RiskLevel};
use crate::narration::{WorldIntent, WorldIntentKind};
use crate::text::{normalize, truncate_chars};
use crate::world::{
    apply_critical_mutation, apply_world_delta, CriticalPatch, LocationRef, NarrativeStage, Patch,
    PendingAccess, PendingAction, PendingTravel, TransitionMeta, WorldDelta, WorldState,
};
use serde_json::{json, Value};
use tracing::debug;

const MAX_ACTION_LABEL_CHARS: usize = 120;

/// Reputation gained when the player opens a conversation.
const ENGAGE_REPUTATION: i32 = 1;

/// What a committed turn does to the world.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuntimeStep {
    ProposeTravel(PendingTravel),
    ProposeAccess(PendingAccess),
    ProposeAction(PendingAction),
    /// The destination is the current location.
    AlreadyThere(LocationRef),
    Engage(String),
    Release(String),
    Act(WorldDelta),
    /// A gate is outstanding and the message did not resolve it.
    Hold(NarrativeStage),
}

impl RuntimeStep {
    /// Whether applying this step changes the world.
    pub fn mutates(&self) -> bool {
        !matches!(self, RuntimeStep::AlreadyThere(_) | RuntimeStep::Hold(_))
    }

    /// Compact description sent to the oracle.
    pub fn describe(&self) -> Value {
        match self {
            RuntimeStep::ProposeTravel(t) => json!({
                "kind": "travel_proposal",
                "to": t.to.label,
                "durationMin": t.duration_min,
                "note": "Le trajet n'est pas encore confirmé.",
            }),
            RuntimeStep::ProposeAccess(a) => json!({
                "kind": "access_challenge",
                "target": a.target.label,
                "challenge": a.challenge,
            }),
            RuntimeStep::ProposeAction(a) => json!({
                "kind": "action_confirmation",
                "action": a.label,
                "riskLevel": a.risk_level,
            }),
            RuntimeStep::AlreadyThere(at) => json!({"kind": "already_there", "location": at.label}),
            RuntimeStep::Engage(label) => json!({"kind": "engage", "interlocutor": label}),
            RuntimeStep::Release(label) => json!({"kind": "leave", "interlocutor": label}),
            RuntimeStep::Act(delta) => json!({"kind": "action", "delta": delta}),
            RuntimeStep::Hold(stage) => json!({"kind": "hold", "stage": stage}),
        }
    }
}

/// Metric change for an action of the given risk.
pub(crate) fn risk_delta(risk: RiskLevel, reason: &str) -> WorldDelta {
    match risk {
        RiskLevel::High => WorldDelta::new(-5, 10, reason),
        RiskLevel::Medium => WorldDelta::new(-1, 4, reason),
        RiskLevel::Low | RiskLevel::None => WorldDelta::none(reason),
    }
}

/// Decide the step for a turn the director lets mutate.
pub(crate) fn plan_step(
    intent: &Intent,
    message: &str,
    world: &WorldState,
    config: &EngineConfig,
) -> RuntimeStep {
    if world.has_pending_gate() {
        return RuntimeStep::Hold(world.narrative_stage());
    }
    let reason = truncate_chars(message.trim(), MAX_ACTION_LABEL_CHARS);
    let interlocutor = world.conversation.active_interlocutor.clone();

    match (intent.action, intent.target.as_deref()) {
        (ActionKind::Travel, Some(target)) => travel_step(target, world, config),
        (ActionKind::Talk, Some(target)) => RuntimeStep::Engage(target.to_string()),
        (ActionKind::Farewell, _) => match interlocutor {
            Some(label) => RuntimeStep::Release(label),
            None => RuntimeStep::Act(WorldDelta::none(reason)),
        },
        (ActionKind::Physical, target) => {
            if intent.risk_level == RiskLevel::High
                && config.confirm_high_risk_actions
                && intent.commitment.is_binding()
            {
                RuntimeStep::ProposeAction(PendingAction::new(
                    reason,
                    intent.intent_type,
                    intent.commitment,
                    intent.risk_level,
                    target.map(str::to_string),
                    world.now_game_min(),
                ))
            } else {
                RuntimeStep::Act(risk_delta(intent.risk_level, &reason))
            }
        }
        _ => RuntimeStep::Act(WorldDelta::none(reason)),
    }
}

/// A step proposed by the oracle's `worldIntent`, for turns the policy did
/// not force. Only travel, engage and leave are accepted.
pub(crate) fn step_from_world_intent(
    world_intent: &WorldIntent,
    world: &WorldState,
    config: &EngineConfig,
) -> Option<RuntimeStep> {
    if world.has_pending_gate() {
        return None;
    }
    let target = world_intent
        .target_label
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    match (world_intent.kind, target) {
        (WorldIntentKind::Travel, Some(target)) => Some(travel_step(target, world, config)),
        (WorldIntentKind::Engage, Some(target)) => Some(RuntimeStep::Engage(target.to_string())),
        (WorldIntentKind::Leave, _) => world
            .conversation
            .active_interlocutor
            .clone()
            .map(RuntimeStep::Release),
        _ => None,
    }
}

fn travel_step(target: &str, world: &WorldState, config: &EngineConfig) -> RuntimeStep {
    let place = world.place_by_label(target);
    let to = place
        .map(|p| p.location())
        .unwrap_or_else(|| LocationRef::from_label(target));
    if to.id == world.location.id || normalize(&to.label) == normalize(&world.location.label) {
        return RuntimeStep::AlreadyThere(world.location.clone());
    }

    let now = world.now_game_min();
    match place {
        Some(p) if p.restricted => {
            let keyword = p.access_keyword.clone().unwrap_or_default();
            let answers = if keyword.trim().is_empty() {
                Vec::new()
            } else {
                vec![normalize(&keyword)]
            };
            RuntimeStep::ProposeAccess(PendingAccess::new(
                to,
                "On te barre le passage : « Qui t'envoie, et que viens-tu faire ici ? »",
                answers,
                now,
            ))
        }
        _ => {
            let minutes = place
                .and_then(|p| p.travel_minutes)
                .unwrap_or(config.default_travel_minutes);
            RuntimeStep::ProposeTravel(PendingTravel::new(world.location.clone(), to, minutes, now))
        }
    }
}

/// Apply a step to the world.
pub(crate) fn apply_step(world: &WorldState, step: &RuntimeStep, intent_type: IntentType) -> WorldState {
    let next = match step {
        RuntimeStep::ProposeTravel(travel) => apply_critical_mutation(
            world,
            &CriticalPatch {
                pending_travel: Patch::Set(travel.clone()),
                ..Default::default()
            },
        ),
        RuntimeStep::ProposeAccess(access) => apply_critical_mutation(
            world,
            &CriticalPatch {
                pending_access: Patch::Set(access.clone()),
                ..Default::default()
            },
        ),
        RuntimeStep::ProposeAction(action) => apply_critical_mutation(
            world,
            &CriticalPatch {
                pending_action: Patch::Set(action.clone()),
                ..Default::default()
            },
        ),
        RuntimeStep::Engage(label) => {
            let delta = WorldDelta::new(ENGAGE_REPUTATION, 0, format!("Conversation avec {label}"));
            let next = apply_world_delta(world, &delta, &TransitionMeta::new(IntentType::SocialAction));
            apply_critical_mutation(
                &next,
                &CriticalPatch {
                    active_interlocutor: Patch::Set(label.clone()),
                    ..Default::default()
                },
            )
        }
        RuntimeStep::Release(label) => {
            let delta = WorldDelta::none(format!("Fin de la conversation avec {label}"));
            let next = apply_world_delta(world, &delta, &TransitionMeta::new(IntentType::SocialAction));
            apply_critical_mutation(
                &next,
                &CriticalPatch {
                    active_interlocutor: Patch::Clear,
                    ..Default::default()
                },
            )
        }
        RuntimeStep::Act(delta) => apply_world_delta(world, delta, &TransitionMeta::new(intent_type)),
        RuntimeStep::AlreadyThere(_) | RuntimeStep::Hold(_) => world.clone(),
    };
    let described = step.describe();
    debug!(step = %described["kind"], "runtime step applied");
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::HeuristicClassifier;
    use crate::world::{declare_place, SessionPlace};

    fn config() -> EngineConfig {
        EngineConfig::new()
    }

    fn step(message: &str, world: &WorldState) -> RuntimeStep {
        let intent = HeuristicClassifier.classify(message, world);
        plan_step(&intent, message, world, &config())
    }

    #[test]
    fn test_travel_uses_known_duration() {
        let world = declare_place(
            &WorldState::new("s1", "Place du Marché"),
            SessionPlace::from_label("Port Est").with_travel_minutes(3),
        );
        match step("Je vais au Port Est.", &world) {
            RuntimeStep::ProposeTravel(t) => {
                assert_eq!(t.to.id, "port-est");
                assert_eq!(t.duration_min, 3);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_unknown_destination_uses_default_duration() {
        let world = WorldState::new("s1", "Place du Marché");
        match step("Je vais à la Tour Grise.", &world) {
            RuntimeStep::ProposeTravel(t) => {
                assert_eq!(t.duration_min, config().default_travel_minutes);
                assert_eq!(t.to.label, "Tour Grise");
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_restricted_place_creates_access_challenge() {
        let world = declare_place(
            &WorldState::new("s1", "Place du Marché"),
            SessionPlace::from_label("Entrepôt").restricted("Sel Marin"),
        );
        match step("Je vais à l'Entrepôt.", &world) {
            RuntimeStep::ProposeAccess(a) => {
                assert_eq!(a.target.id, "entrepot");
                assert_eq!(a.accepted_answers, vec!["sel marin".to_string()]);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_high_risk_action_needs_confirmation() {
        let world = WorldState::new("s1", "Place du Marché");
        let proposed = step("J'attaque le marchand.", &world);
        assert!(matches!(proposed, RuntimeStep::ProposeAction(_)));

        let next = apply_step(&world, &proposed, IntentType::StoryAction);
        assert!(next.conversation.pending_action.is_some());
        assert_eq!(next.metrics, world.metrics);
        assert_eq!(next.time, world.time);
        assert!(matches!(step("J'attaque encore.", &next), RuntimeStep::Hold(_)));
    }

    #[test]
    fn test_engage_and_release() {
        let world = WorldState::new("s1", "Place du Marché");
        let engage = step("Je parle au garde.", &world);
        assert_eq!(engage, RuntimeStep::Engage("Garde".to_string()));
        let next = apply_step(&world, &engage, IntentType::SocialAction);
        assert_eq!(next.conversation.active_interlocutor.as_deref(), Some("Garde"));

        let release = step("Au revoir.", &next);
        assert_eq!(release, RuntimeStep::Release("Garde".to_string()));
        let after = apply_step(&next, &release, IntentType::SocialAction);
        assert!(after.conversation.active_interlocutor.is_none());
    }

    #[test]
    fn test_already_there_does_not_mutate() {
        let world = WorldState::new("s1", "Place du Marché");
        let here = step("Je vais à la Place du Marché.", &world);
        assert!(matches!(here, RuntimeStep::AlreadyThere(_)));
        assert!(!here.mutates());
        assert_eq!(apply_step(&world, &here, IntentType::StoryAction), world);
    }
}
