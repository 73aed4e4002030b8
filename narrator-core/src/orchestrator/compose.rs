//! Oracle context documents and the deterministic replies used when the
//! oracle is absent, out of budget or failing.

use super::runtime::RuntimeStep;
use crate::director::{DirectorMode, DirectorPlan, ShortCircuit};
use crate::intent::{ActionKind, Intent};
use crate::memory::MemoryRow;
use crate::narration::{NarrativeDraft, ResponseType};
use crate::profile::{derive_rules_pack, CharacterProfile};
use crate::tools::{ToolSpec, ToolTraceEntry};
use crate::world::{NarrativeStage, WorldState};
use serde_json::{json, Value};

const MAX_MEMORY_MENTIONS: usize = 3;
const MAX_PLACE_OPTIONS: usize = 4;

/// Everything the narrator is told about a turn.
pub(crate) struct NarrationInput<'a> {
    pub message: &'a str,
    pub intent: &'a Intent,
    pub plan: &'a DirectorPlan,
    pub world: &'a WorldState,
    pub step: Option<&'a RuntimeStep>,
    pub profile: Option<&'a CharacterProfile>,
    pub scene_memory: &'a [MemoryRow],
    pub lore_hints: &'a Value,
    pub tools: &'a [ToolSpec],
}

/// The context document for a `narrate` call.
pub(crate) fn narration_context(input: &NarrationInput<'_>) -> Value {
    let world = input.world;
    let c = &world.conversation;
    json!({
        "message": input.message,
        "intent": input.intent,
        "director": input.plan,
        "world": world.summary(),
        "canonicalContext": {
            "location": world.location,
            "time": world.time.label(),
            "activeInterlocutor": c.active_interlocutor,
            "sceneFrame": c.scene_frame,
            "narrativeStage": world.narrative_stage(),
        },
        "pendingGates": {
            "travel": c.pending_travel,
            "access": c.pending_access.as_ref().map(|a| json!({
                "target": a.target.label,
                "challenge": a.challenge,
                "attemptsLeft": a.attempts_left(),
            })),
            "action": c.pending_action,
        },
        "proposedChange": input.step.map(RuntimeStep::describe),
        "sceneMemory": input.scene_memory,
        "loreHints": input.lore_hints,
        "rulesPack": derive_rules_pack(input.profile),
        "tools": input.tools,
    })
}

/// The context document for a `refine` call.
pub(crate) fn refine_context(narration: &Value, draft: &NarrativeDraft, trace: &[ToolTraceEntry]) -> Value {
    json!({
        "context": narration,
        "draft": draft,
        "toolTrace": trace,
    })
}

// =============================================================================
// Deterministic replies
// =============================================================================

/// Reply for a turn that ends before tools and narration.
pub(crate) fn clarification(reason: ShortCircuit, intent: &Intent, world: &WorldState) -> NarrativeDraft {
    let mut draft = NarrativeDraft {
        response_type: ResponseType::Clarification,
        confidence: 1.0,
        ..Default::default()
    };
    match reason {
        ShortCircuit::Hypothetical => {
            draft.direct_answer = "C'est une hypothèse : rien ne se passe tant que ton personnage n'agit pas. Que fais-tu réellement ?".to_string();
        }
        ShortCircuit::MissingTarget if intent.action == ActionKind::Travel => {
            draft.direct_answer = "Où veux-tu aller exactement ?".to_string();
            draft.options = world
                .session_places
                .iter()
                .filter(|p| p.id != world.location.id)
                .take(MAX_PLACE_OPTIONS)
                .map(|p| format!("Aller à {}", p.label))
                .collect();
        }
        ShortCircuit::MissingTarget => {
            draft.direct_answer = "À qui ou à quoi t'adresses-tu exactement ?".to_string();
        }
        ShortCircuit::MissingInterlocutor => {
            draft.direct_answer =
                "Personne ne te fait face pour l'instant. À qui veux-tu parler ?".to_string();
        }
        ShortCircuit::Informative => {
            draft.direct_answer = "Que veux-tu savoir ?".to_string();
        }
    }
    draft.scene = format!("Tu es toujours à {}.", world.location.label);
    draft
}

/// Reply assembled from the plan, the step and the tool results.
pub(crate) fn deterministic_draft(
    plan: &DirectorPlan,
    step: Option<&RuntimeStep>,
    world: &WorldState,
    trace: &[ToolTraceEntry],
) -> NarrativeDraft {
    let mut draft = NarrativeDraft {
        confidence: 1.0,
        ..Default::default()
    };
    let here = &world.location.label;
    draft.scene = format!("Tu es à {here}. {}.", world.time.label());

    if plan.mode == DirectorMode::Lore || plan.short_circuit == Some(ShortCircuit::Informative) {
        draft.response_type = if plan.mode == DirectorMode::Lore {
            ResponseType::Lore
        } else {
            ResponseType::Narration
        };
        draft.direct_answer = lore_answer(trace).unwrap_or_else(|| {
            "Personne ici ne saurait te répondre avec certitude.".to_string()
        });
    }

    match step {
        Some(RuntimeStep::ProposeTravel(t)) => {
            draft.scene = format!(
                "Tu t'apprêtes à quitter {} pour {}. Le trajet prendra environ {} minutes.",
                t.from.label, t.to.label, t.duration_min
            );
            draft.options = vec!["Confirmer le départ".to_string(), "Annuler".to_string()];
        }
        Some(RuntimeStep::ProposeAccess(a)) => {
            draft.scene = format!("L'entrée de {} est gardée. {}", a.target.label, a.challenge);
        }
        Some(RuntimeStep::ProposeAction(a)) => {
            draft.action_result = format!("Tu t'apprêtes à agir : « {} ». C'est risqué, confirmes-tu ?", a.label);
            draft.options = vec!["Confirmer".to_string(), "Renoncer".to_string()];
        }
        Some(RuntimeStep::AlreadyThere(at)) => {
            draft.action_result = format!("Tu es déjà à {}.", at.label);
        }
        Some(RuntimeStep::Engage(label)) => {
            draft.response_type = ResponseType::Dialogue;
            draft.action_result = format!("{label} se tourne vers toi, prêt à t'écouter.");
        }
        Some(RuntimeStep::Release(label)) => {
            draft.action_result = format!("Tu prends congé de {label}.");
        }
        Some(RuntimeStep::Act(delta)) => {
            if !delta.reason.trim().is_empty() {
                draft.action_result = format!("Tu agis : « {} ».", delta.reason);
            }
            if delta.local_tension_delta > 0 {
                draft.consequences.push(format!("La tension monte à {here}."));
            }
            if delta.reputation_delta < 0 {
                draft.consequences.push("Des regards méfiants se posent sur toi.".to_string());
            }
        }
        Some(RuntimeStep::Hold(stage)) => {
            draft.action_result = hold_reminder(*stage, world);
        }
        None => {}
    }

    if rumor_recorded(trace) {
        draft
            .consequences
            .push(format!("Des rumeurs d'agitation courent à {here}."));
    }
    let remembered = remembered_labels(trace);
    if !remembered.is_empty() {
        draft.scene.push_str(&format!(" Ici, tu te souviens de : {}.", remembered.join(", ")));
    }
    draft
}

fn hold_reminder(stage: NarrativeStage, world: &WorldState) -> String {
    let c = &world.conversation;
    match stage {
        NarrativeStage::TravelProposal => c
            .pending_travel
            .as_ref()
            .map(|t| format!("Ton départ pour {} attend toujours ta confirmation (oui / non).", t.to.label)),
        NarrativeStage::AccessChallenge => c.pending_access.as_ref().map(|a| a.challenge.clone()),
        NarrativeStage::ActionConfirmation => c
            .pending_action
            .as_ref()
            .map(|a| format!("Ton action « {} » attend ta confirmation (oui / non).", a.label)),
        NarrativeStage::Exploration | NarrativeStage::Conversation => None,
    }
    .unwrap_or_default()
}

fn results_of<'a>(trace: &'a [ToolTraceEntry], tool: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    trace
        .iter()
        .filter(move |e| e.tool == tool)
        .filter_map(|e| e.result.as_ref())
}

fn lore_answer(trace: &[ToolTraceEntry]) -> Option<String> {
    results_of(trace, "query_lore")
        .filter_map(|r| r["results"].as_array())
        .flatten()
        .next()
        .and_then(|record| {
            let title = record["title"].as_str()?;
            let text = record["text"].as_str().unwrap_or_default();
            Some(format!("{title} : {text}").trim_end_matches([' ', ':']).to_string())
        })
}

fn rumor_recorded(trace: &[ToolTraceEntry]) -> bool {
    results_of(trace, "quest_trama_tick").any(|r| r["rumor"].is_string())
}

fn remembered_labels(trace: &[ToolTraceEntry]) -> Vec<String> {
    results_of(trace, "session_db_read")
        .filter_map(|r| r["rows"].as_array())
        .flatten()
        .filter_map(|row| row["label"].as_str())
        .take(MAX_MEMORY_MENTIONS)
        .map(str::to_string)
        .collect()
}

/// Player-visible text of a draft.
pub(crate) fn render(draft: &NarrativeDraft) -> String {
    let mut blocks: Vec<String> = Vec::new();
    for part in [&draft.direct_answer, &draft.scene, &draft.action_result] {
        if !part.trim().is_empty() {
            blocks.push(part.trim().to_string());
        }
    }
    if !draft.consequences.is_empty() {
        blocks.push(
            draft
                .consequences
                .iter()
                .map(|c| format!("- {c}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    if !draft.options.is_empty() {
        blocks.push(
            draft
                .options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {o}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    blocks.join("\n\n")
}

/// Intro prepended to the first reply of a session.
pub(crate) fn intro(world: &WorldState, profile: Option<&CharacterProfile>) -> String {
    let greeting = match profile.map(|p| p.name.trim()).filter(|n| !n.is_empty()) {
        Some(name) => format!("Bienvenue, {name}."),
        None => "Bienvenue.".to_string(),
    };
    format!(
        "{greeting} Ton histoire commence à {} ({}).",
        world.location.label,
        world.time.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::PlanSource;
    use crate::tools::CallOrigin;
    use crate::world::{LocationRef, PendingTravel, WorldDelta};

    fn plan(mode: DirectorMode) -> DirectorPlan {
        DirectorPlan {
            mode,
            apply_runtime: mode == DirectorMode::Runtime,
            source: PlanSource::Intent,
            forced_runtime: false,
            short_circuit: None,
        }
    }

    fn trace(tool: &str, result: Value) -> ToolTraceEntry {
        ToolTraceEntry {
            tool: tool.to_string(),
            args: json!({}),
            origin: CallOrigin::Policy,
            result: Some(result),
            error: None,
        }
    }

    #[test]
    fn test_lore_answer_from_trace() {
        let world = WorldState::new("s1", "Place du Marché");
        let lore = trace(
            "query_lore",
            json!({"results": [{"id": "guilde", "title": "Guilde", "text": "Elle tient le port.", "score": 2}]}),
        );
        let draft = deterministic_draft(&plan(DirectorMode::Lore), None, &world, &[lore]);
        assert_eq!(draft.response_type, ResponseType::Lore);
        assert_eq!(draft.direct_answer, "Guilde : Elle tient le port.");
    }

    #[test]
    fn test_travel_proposal_reply() {
        let world = WorldState::new("s1", "Place du Marché");
        let step = RuntimeStep::ProposeTravel(PendingTravel::new(
            world.location.clone(),
            LocationRef::from_label("Port Est"),
            3,
            0,
        ));
        let draft = deterministic_draft(&plan(DirectorMode::Runtime), Some(&step), &world, &[]);
        assert!(draft.scene.contains("Port Est"));
        assert!(draft.scene.contains("3 minutes"));
        assert_eq!(draft.options.len(), 2);
    }

    #[test]
    fn test_act_consequences() {
        let world = WorldState::new("s1", "Place du Marché");
        let step = RuntimeStep::Act(WorldDelta::new(-5, 10, "Je frappe le marchand"));
        let rumor = trace("quest_trama_tick", json!({"pressure": 50, "stage": "agitation", "rumor": "Agitation"}));
        let draft = deterministic_draft(&plan(DirectorMode::Runtime), Some(&step), &world, &[rumor]);
        assert_eq!(draft.consequences.len(), 3);
        assert!(draft.action_result.contains("Je frappe le marchand"));
    }

    #[test]
    fn test_render_layout() {
        let draft = NarrativeDraft {
            scene: "Le quai est calme.".to_string(),
            consequences: vec!["Un garde te remarque.".to_string()],
            options: vec!["Saluer".to_string(), "Partir".to_string()],
            ..Default::default()
        };
        assert_eq!(
            render(&draft),
            "Le quai est calme.\n\n- Un garde te remarque.\n\n1. Saluer\n2. Partir"
        );
    }
}
