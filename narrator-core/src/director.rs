//! Director policy: how a classified turn is handled.
//!
//! The plan decides whether the turn may change the world, and whether it
//! short-circuits into a clarification or a read-only answer. The oracle
//! can only relax a plan through the bypass allow-list.

use crate::intent::{ActionKind, Commitment, Intent, IntentType};
use crate::narration::{NarrativeDraft, ResponseType};
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Narrative handling chosen for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorMode {
    Lore,
    Exploration,
    Runtime,
    SceneOnly,
}

/// Who settled the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Intent,
    Policy,
    Oracle,
}

/// Turns that end before tools and narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShortCircuit {
    Hypothetical,
    Informative,
    MissingTarget,
    MissingInterlocutor,
}

/// Response types the oracle may use to skip the mutation engine.
pub const BYPASS_ALLOW_LIST: &[ResponseType] = &[ResponseType::Status, ResponseType::Lore];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorPlan {
    pub mode: DirectorMode,
    pub apply_runtime: bool,
    pub source: PlanSource,
    /// Runtime forced by policy; the oracle cannot bypass it.
    #[serde(default)]
    pub forced_runtime: bool,
    #[serde(default)]
    pub short_circuit: Option<ShortCircuit>,
}

impl DirectorPlan {
    fn new(mode: DirectorMode, apply_runtime: bool, source: PlanSource) -> Self {
        Self {
            mode,
            apply_runtime,
            source,
            forced_runtime: false,
            short_circuit: None,
        }
    }

    fn short(mode: DirectorMode, reason: ShortCircuit) -> Self {
        Self {
            short_circuit: Some(reason),
            ..Self::new(mode, false, PlanSource::Policy)
        }
    }

    fn forced() -> Self {
        Self {
            forced_runtime: true,
            ..Self::new(DirectorMode::Runtime, true, PlanSource::Policy)
        }
    }
}

/// Derive the plan for a classified turn.
pub fn plan_turn(intent: &Intent, world: &WorldState) -> DirectorPlan {
    if intent.intent_type == IntentType::SystemCommand {
        return DirectorPlan::new(DirectorMode::SceneOnly, false, PlanSource::Policy);
    }

    match intent.commitment {
        Commitment::Hypothetique => {
            return DirectorPlan::short(DirectorMode::SceneOnly, ShortCircuit::Hypothetical);
        }
        Commitment::Informatif => {
            let mode = if intent.intent_type == IntentType::LoreQuestion {
                DirectorMode::Lore
            } else {
                DirectorMode::SceneOnly
            };
            return DirectorPlan::short(mode, ShortCircuit::Informative);
        }
        Commitment::Declaratif | Commitment::Volitif => {}
    }

    let interlocutor = world.conversation.active_interlocutor.is_some();
    if intent.pronoun_reference && !interlocutor && intent.target.is_none() {
        return DirectorPlan::short(DirectorMode::SceneOnly, ShortCircuit::MissingInterlocutor);
    }

    let needs_target = match intent.action {
        ActionKind::Travel => true,
        ActionKind::Talk => !interlocutor,
        _ => false,
    };
    if needs_target && intent.target.is_none() && !world.has_pending_gate() {
        return DirectorPlan::short(DirectorMode::SceneOnly, ShortCircuit::MissingTarget);
    }

    let is_action = matches!(
        intent.intent_type,
        IntentType::StoryAction | IntentType::SocialAction
    ) || intent.action != ActionKind::None;
    if is_action {
        return DirectorPlan::forced();
    }

    match intent.intent_type {
        IntentType::LoreQuestion => DirectorPlan::new(DirectorMode::Lore, false, PlanSource::Intent),
        _ => DirectorPlan::new(DirectorMode::Exploration, true, PlanSource::Intent),
    }
}

/// Apply the oracle's `bypassExistingMechanics` request.
///
/// Honored only for allow-listed response types, with no pending gate and
/// no policy-forced runtime. Returns whether the bypass was honored.
pub fn arbitrate(plan: &mut DirectorPlan, draft: &NarrativeDraft, world: &WorldState) -> bool {
    if !draft.bypass_existing_mechanics {
        return false;
    }
    let allowed = BYPASS_ALLOW_LIST.contains(&draft.response_type)
        && !world.has_pending_gate()
        && !plan.forced_runtime;
    if !allowed {
        debug!(
            response_type = ?draft.response_type,
            forced = plan.forced_runtime,
            "oracle bypass request ignored"
        );
        return false;
    }

    plan.apply_runtime = false;
    plan.mode = match draft.response_type {
        ResponseType::Lore => DirectorMode::Lore,
        _ => DirectorMode::SceneOnly,
    };
    plan.source = PlanSource::Oracle;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::HeuristicClassifier;
    use crate::world::{apply_critical_mutation, CriticalPatch, LocationRef, Patch, PendingTravel};

    fn plan(message: &str, world: &WorldState) -> DirectorPlan {
        plan_turn(&HeuristicClassifier.classify(message, world), world)
    }

    fn world() -> WorldState {
        WorldState::new("s1", "Place du Marché")
    }

    #[test]
    fn test_hypothetical_short_circuits() {
        let plan = plan("Et si je sautais dans le port ?", &world());
        assert_eq!(plan.short_circuit, Some(ShortCircuit::Hypothetical));
        assert!(!plan.apply_runtime);
    }

    #[test]
    fn test_question_is_informative() {
        let plan = plan("Qui dirige la guilde ?", &world());
        assert_eq!(plan.short_circuit, Some(ShortCircuit::Informative));
        assert_eq!(plan.mode, DirectorMode::Lore);
    }

    #[test]
    fn test_travel_without_destination_needs_target() {
        let plan = plan("Je pars.", &world());
        assert_eq!(plan.short_circuit, Some(ShortCircuit::MissingTarget));
    }

    #[test]
    fn test_pronoun_without_interlocutor() {
        let plan = plan("Je lui parle.", &world());
        assert_eq!(plan.short_circuit, Some(ShortCircuit::MissingInterlocutor));
    }

    #[test]
    fn test_declared_action_forces_runtime() {
        let plan = plan("Je vais au Port Est.", &world());
        assert!(plan.apply_runtime);
        assert!(plan.forced_runtime);
        assert_eq!(plan.mode, DirectorMode::Runtime);
    }

    #[test]
    fn test_bypass_allow_list() {
        let world = world();
        let status = NarrativeDraft {
            response_type: ResponseType::Status,
            bypass_existing_mechanics: true,
            ..Default::default()
        };
        let mut exploring = DirectorPlan::new(DirectorMode::Exploration, true, PlanSource::Intent);
        assert!(arbitrate(&mut exploring, &status, &world));
        assert!(!exploring.apply_runtime);
        assert_eq!(exploring.source, PlanSource::Oracle);

        let mut forced = DirectorPlan::forced();
        assert!(!arbitrate(&mut forced, &status, &world));
        assert!(forced.apply_runtime);

        let narration = NarrativeDraft {
            bypass_existing_mechanics: true,
            ..Default::default()
        };
        let mut exploring = DirectorPlan::new(DirectorMode::Exploration, true, PlanSource::Intent);
        assert!(!arbitrate(&mut exploring, &narration, &world));
    }

    #[test]
    fn test_bypass_refused_with_pending_gate() {
        let base = world();
        let gated = apply_critical_mutation(
            &base,
            &CriticalPatch {
                pending_travel: Patch::Set(PendingTravel::new(
                    base.location.clone(),
                    LocationRef::from_label("Port Est"),
                    3,
                    0,
                )),
                ..Default::default()
            },
        );
        let lore = NarrativeDraft {
            response_type: ResponseType::Lore,
            bypass_existing_mechanics: true,
            ..Default::default()
        };
        let mut plan = DirectorPlan::new(DirectorMode::Exploration, true, PlanSource::Intent);
        assert!(!arbitrate(&mut plan, &lore, &gated));
    }
}
