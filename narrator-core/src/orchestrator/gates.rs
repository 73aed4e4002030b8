//! Resolution of outstanding pending gates.
//!
//! Gates are looked at in a fixed order (travel, access, action) and only
//! the first outstanding one is considered. A message that neither
//! confirms nor cancels leaves a travel or action gate untouched; for an
//! access challenge every message is an answer.
//!
//! A confirmation or cancellation is a short reply that opens with one of
//! the phrases below. "Let's go to the tavern instead" is a new request,
//! not a yes.

use super::runtime::risk_delta;
use crate::intent::{ActionKind, HeuristicClassifier, IntentType};
use crate::narration::{NarrativeDraft, ResponseType};
use crate::text::{contains_word, find_first, normalize, word_count};
use crate::world::{
    apply_critical_mutation, apply_travel, apply_world_delta, CriticalPatch, LocationRef, Patch,
    PendingAccess, PendingAction, PendingTravel, TransitionMeta, TravelRequest, WorldDelta,
    WorldState,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIRM_PHRASES: &[&str] = &[
    "oui",
    "yes",
    "ok",
    "d'accord",
    "confirme",
    "je confirme",
    "allons-y",
    "on y va",
    "go",
    "vas-y",
    "c'est parti",
    "confirm",
];

const CANCEL_PHRASES: &[&str] = &[
    "non",
    "no",
    "annule",
    "j'annule",
    "cancel",
    "laisse tomber",
    "stop",
];

/// Longest message still read as a bare yes or no.
const MAX_REPLY_WORDS: usize = 6;

/// Minutes it takes to step into a place once access is granted.
pub const ACCESS_GRANTED_TRAVEL_MIN: u32 = 1;

/// Tension raised when an access challenge is failed.
pub const ACCESS_DENIED_TENSION: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    TravelConfirmed,
    TravelCancelled,
    AccessGranted,
    AccessRetry,
    AccessDenied,
    AccessCancelled,
    ActionConfirmed,
    ActionCancelled,
}

/// A resolved gate: the next world and the reply announcing it.
#[derive(Debug, Clone)]
pub(crate) struct GateResolution {
    pub outcome: GateOutcome,
    pub world: WorldState,
    pub draft: NarrativeDraft,
    /// Where the player arrived, if the resolution moved them.
    pub arrival: Option<LocationRef>,
}

pub fn is_confirmation(message: &str) -> bool {
    opens_with(message, CONFIRM_PHRASES)
}

pub fn is_cancellation(message: &str) -> bool {
    opens_with(message, CANCEL_PHRASES)
}

fn opens_with(message: &str, phrases: &[&str]) -> bool {
    let text = normalize(message);
    let text = text.trim_start_matches(|c: char| !c.is_alphanumeric());
    word_count(text) <= MAX_REPLY_WORDS
        && find_first(text, phrases).is_some_and(|(pos, _)| pos == 0)
}

/// The message asks to travel somewhere other than the proposed destination.
fn names_other_destination(world: &WorldState, travel: &PendingTravel, message: &str) -> bool {
    let intent = HeuristicClassifier.classify(message, world);
    intent.action == ActionKind::Travel
        && intent
            .target
            .as_deref()
            .is_some_and(|target| normalize(target) != normalize(&travel.to.label))
}

/// Resolve the first outstanding gate against `message`, if the message
/// settles it.
pub(crate) fn resolve_pending_gate(world: &WorldState, message: &str) -> Option<GateResolution> {
    let conversation = &world.conversation;
    if let Some(travel) = &conversation.pending_travel {
        return resolve_travel(world, travel, message);
    }
    if let Some(access) = &conversation.pending_access {
        return Some(resolve_access(world, access, message));
    }
    if let Some(action) = &conversation.pending_action {
        return resolve_action(world, action, message);
    }
    None
}

fn resolve_travel(
    world: &WorldState,
    travel: &PendingTravel,
    message: &str,
) -> Option<GateResolution> {
    if is_cancellation(message) {
        let next = apply_critical_mutation(
            world,
            &CriticalPatch {
                pending_travel: Patch::Clear,
                ..Default::default()
            },
        );
        info!(to = %travel.to.id, "pending travel cancelled");
        return Some(GateResolution {
            outcome: GateOutcome::TravelCancelled,
            draft: gate_draft(format!(
                "Tu renonces à partir pour {}. Tu restes à {}.",
                travel.to.label, world.location.label
            )),
            world: next,
            arrival: None,
        });
    }
    if !is_confirmation(message) {
        debug!("pending travel left outstanding");
        return None;
    }
    if names_other_destination(world, travel, message) {
        debug!(to = %travel.to.id, "reply names another destination, travel left outstanding");
        return None;
    }

    let next = apply_travel(world, &TravelRequest::from(travel));
    info!(to = %travel.to.id, minutes = travel.duration_min, "pending travel confirmed");
    Some(GateResolution {
        outcome: GateOutcome::TravelConfirmed,
        draft: gate_draft(format!(
            "Après {} minutes de trajet, tu arrives à {}.",
            travel.duration_min, next.location.label
        )),
        arrival: Some(next.location.clone()),
        world: next,
    })
}

fn resolve_access(world: &WorldState, access: &PendingAccess, message: &str) -> GateResolution {
    let cleared = || {
        apply_critical_mutation(
            world,
            &CriticalPatch {
                pending_access: Patch::Clear,
                ..Default::default()
            },
        )
    };

    if is_cancellation(message) {
        return GateResolution {
            outcome: GateOutcome::AccessCancelled,
            draft: gate_draft(format!(
                "Tu renonces à entrer à {}. Tu restes à {}.",
                access.target.label, world.location.label
            )),
            world: cleared(),
            arrival: None,
        };
    }

    let answer = normalize(message);
    let granted = access
        .accepted_answers
        .iter()
        .map(|a| normalize(a))
        .any(|a| !a.is_empty() && contains_word(&answer, &a));
    if granted {
        let next = apply_travel(
            &cleared(),
            &TravelRequest {
                from: world.location.clone(),
                to: access.target.clone(),
                duration_min: ACCESS_GRANTED_TRAVEL_MIN,
                reason: format!("Accès à {}", access.target.label),
            },
        );
        info!(target = %access.target.id, "access granted");
        return GateResolution {
            outcome: GateOutcome::AccessGranted,
            draft: gate_draft(format!(
                "On s'écarte pour te laisser passer. Te voici à {}.",
                next.location.label
            )),
            arrival: Some(next.location.clone()),
            world: next,
        };
    }

    let attempts = access.attempts + 1;
    if attempts >= access.max_attempts {
        let delta = WorldDelta::new(
            0,
            ACCESS_DENIED_TENSION,
            format!("Accès refusé à {}", access.target.label),
        );
        let next = apply_world_delta(&cleared(), &delta, &TransitionMeta::new(IntentType::SocialAction));
        info!(target = %access.target.id, attempts, "access denied");
        return GateResolution {
            outcome: GateOutcome::AccessDenied,
            draft: NarrativeDraft {
                consequences: vec!["L'atmosphère se tend autour de toi.".to_string()],
                ..gate_draft(format!(
                    "L'accès à {} t'est refusé. Tu restes à {}.",
                    access.target.label, world.location.label
                ))
            },
            world: next,
            arrival: None,
        };
    }

    let retry = PendingAccess {
        attempts,
        ..access.clone()
    };
    let left = retry.attempts_left();
    let next = apply_critical_mutation(
        world,
        &CriticalPatch {
            pending_access: Patch::Set(retry),
            ..Default::default()
        },
    );
    debug!(target = %access.target.id, attempts, left, "access attempt missed");
    GateResolution {
        outcome: GateOutcome::AccessRetry,
        draft: gate_draft(format!(
            "Ce n'est pas la réponse attendue. {} (Encore {} essai{}.)",
            access.challenge,
            left,
            if left > 1 { "s" } else { "" }
        )),
        world: next,
        arrival: None,
    }
}

fn resolve_action(
    world: &WorldState,
    action: &PendingAction,
    message: &str,
) -> Option<GateResolution> {
    let cancelled = is_cancellation(message);
    if !cancelled && !is_confirmation(message) {
        debug!("pending action left outstanding");
        return None;
    }

    let cleared = apply_critical_mutation(
        world,
        &CriticalPatch {
            pending_action: Patch::Clear,
            ..Default::default()
        },
    );
    if cancelled {
        return Some(GateResolution {
            outcome: GateOutcome::ActionCancelled,
            draft: gate_draft(format!("Tu renonces : « {} ».", action.label)),
            world: cleared,
            arrival: None,
        });
    }

    let delta = risk_delta(action.risk_level, &action.label);
    let next = apply_world_delta(&cleared, &delta, &TransitionMeta::new(action.intent_type));
    info!(action = %action.id, risk = ?action.risk_level, "pending action confirmed");
    let mut consequences = Vec::new();
    if delta.local_tension_delta > 0 {
        consequences.push(format!("La tension monte à {}.", next.location.label));
    }
    if delta.reputation_delta < 0 {
        consequences.push("Ta réputation en pâtira.".to_string());
    }
    Some(GateResolution {
        outcome: GateOutcome::ActionConfirmed,
        draft: NarrativeDraft {
            action_result: format!("Tu passes à l'acte : « {} ».", action.label),
            consequences,
            ..gate_draft(format!("Tu es à {}.", next.location.label))
        },
        world: next,
        arrival: None,
    })
}

fn gate_draft(scene: String) -> NarrativeDraft {
    NarrativeDraft {
        response_type: ResponseType::Narration,
        scene,
        confidence: 1.0,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Commitment, RiskLevel};
    use crate::world::SessionPlace;

    fn world() -> WorldState {
        WorldState::new("s1", "Place du Marché")
    }

    fn with_travel(minutes: u32) -> WorldState {
        let base = world();
        let travel = PendingTravel::new(
            base.location.clone(),
            LocationRef::from_label("Port Est"),
            minutes,
            base.now_game_min(),
        );
        apply_critical_mutation(
            &base,
            &CriticalPatch {
                pending_travel: Patch::Set(travel),
                ..Default::default()
            },
        )
    }

    fn with_access() -> WorldState {
        let base = world();
        let place = SessionPlace::from_label("Entrepôt").restricted("mot de passe");
        let access = PendingAccess::new(
            place.location(),
            "Quel est le mot de passe ?",
            vec!["sel marin".to_string()],
            base.now_game_min(),
        );
        apply_critical_mutation(
            &base,
            &CriticalPatch {
                pending_access: Patch::Set(access),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_phrases() {
        assert!(is_confirmation("Oui, allons-y !"));
        assert!(is_confirmation("D’accord"));
        assert!(is_cancellation("Non, laisse tomber."));
        assert!(!is_confirmation("Je regarde le ciel."));
        assert!(!is_cancellation("Je regarde le ciel."));
    }

    #[test]
    fn test_phrases_must_open_a_short_reply() {
        assert!(is_confirmation("« Oui » dis-je."));
        assert!(!is_confirmation("Let's go to the tavern instead"));
        assert!(!is_confirmation("Je dis oui au marchand puis je repars vers la fontaine."));
        assert!(!is_cancellation("Je ne sais pas, non."));
        assert!(!is_cancellation("J'attends que la pluie stop."));
        assert!(!is_cancellation("Je regarde le nonce du marchand."));
    }

    #[test]
    fn test_travel_not_confirmed_toward_another_place() {
        let state = with_travel(3);
        assert!(resolve_pending_gate(&state, "Let's go to the tavern instead").is_none());
        assert!(resolve_pending_gate(&state, "Oui, je vais à la taverne.").is_none());

        let resolution = resolve_pending_gate(&state, "Oui, je vais au Port Est.").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::TravelConfirmed);
    }

    #[test]
    fn test_travel_confirm_moves_player() {
        let state = with_travel(3);
        let before = state.now_game_min();
        let resolution = resolve_pending_gate(&state, "On y va").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::TravelConfirmed);
        assert_eq!(resolution.world.location.id, "port-est");
        assert!(resolution.world.conversation.pending_travel.is_none());
        assert!(resolution.world.travel.pending.is_none());
        assert_eq!(resolution.world.now_game_min() - before, 3);
        assert_eq!(resolution.arrival.unwrap().id, "port-est");
    }

    #[test]
    fn test_travel_cancel_and_unrelated_message() {
        let state = with_travel(3);
        assert!(resolve_pending_gate(&state, "Je regarde autour de moi.").is_none());

        let resolution = resolve_pending_gate(&state, "Non, annule.").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::TravelCancelled);
        assert!(resolution.world.conversation.pending_travel.is_none());
        assert_eq!(resolution.world.location, state.location);
        assert_eq!(resolution.world.time, state.time);
    }

    #[test]
    fn test_access_granted_on_keyword() {
        let state = with_access();
        let resolution = resolve_pending_gate(&state, "Le mot est sel marin.").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::AccessGranted);
        assert_eq!(resolution.world.location.id, "entrepot");
        assert!(resolution.world.conversation.pending_access.is_none());
        assert_eq!(resolution.world.now_game_min() - state.now_game_min(), 1);
    }

    #[test]
    fn test_access_denied_after_max_attempts() {
        let mut state = with_access();
        for expected_left in [2, 1] {
            let resolution = resolve_pending_gate(&state, "Je ne sais pas.").unwrap();
            assert_eq!(resolution.outcome, GateOutcome::AccessRetry);
            let access = resolution.world.conversation.pending_access.clone().unwrap();
            assert_eq!(access.attempts_left(), expected_left);
            state = resolution.world;
        }
        let resolution = resolve_pending_gate(&state, "Aucune idée.").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::AccessDenied);
        assert!(resolution.world.conversation.pending_access.is_none());
        assert_eq!(
            resolution.world.metrics.local_tension,
            state.metrics.local_tension + ACCESS_DENIED_TENSION
        );
    }

    #[test]
    fn test_action_confirm_applies_delta() {
        let base = world();
        let action = PendingAction::new(
            "J'attaque le garde",
            IntentType::StoryAction,
            Commitment::Declaratif,
            RiskLevel::High,
            Some("Garde".to_string()),
            base.now_game_min(),
        );
        let state = apply_critical_mutation(
            &base,
            &CriticalPatch {
                pending_action: Patch::Set(action),
                ..Default::default()
            },
        );
        assert!(resolve_pending_gate(&state, "Hmm.").is_none());

        let resolution = resolve_pending_gate(&state, "Oui").unwrap();
        assert_eq!(resolution.outcome, GateOutcome::ActionConfirmed);
        assert!(resolution.world.conversation.pending_action.is_none());
        assert!(resolution.world.metrics.local_tension > 0);
        assert!(resolution.world.metrics.reputation < 0);
    }
}
