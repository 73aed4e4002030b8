//! Slash commands. They never call the oracle and take no in-game time.

use crate::memory::{ReadQuery, SessionMemory};
use crate::narration::{NarrativeDraft, ResponseType};
use crate::text::normalize;
use crate::world::{reset_world, WorldState};
use chrono::{DateTime, Utc};
use tracing::info;

const MEMORY_ROWS_SHOWN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SystemCommand {
    Status,
    Memory,
    Places,
    Help,
    Reset,
    Unknown(String),
}

impl SystemCommand {
    pub fn parse(message: &str) -> Self {
        let word = message
            .trim()
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .map(normalize)
            .unwrap_or_default();
        match word.as_str() {
            "status" | "statut" | "etat" => SystemCommand::Status,
            "memory" | "memoire" => SystemCommand::Memory,
            "places" | "lieux" => SystemCommand::Places,
            "help" | "aide" => SystemCommand::Help,
            "reset" => SystemCommand::Reset,
            _ => SystemCommand::Unknown(word),
        }
    }
}

pub(crate) struct CommandOutput {
    pub world: WorldState,
    pub draft: NarrativeDraft,
    /// The command reset the session.
    pub reset: bool,
}

pub(crate) fn run_command(
    command: &SystemCommand,
    world: &WorldState,
    memory: &mut SessionMemory,
    start_label: &str,
    now: DateTime<Utc>,
) -> CommandOutput {
    let answer = |text: String| NarrativeDraft {
        response_type: ResponseType::Status,
        direct_answer: text,
        confidence: 1.0,
        ..Default::default()
    };

    let (next, draft, reset) = match command {
        SystemCommand::Status => (world.clone(), answer(status(world)), false),
        SystemCommand::Memory => {
            let mut rows = memory.read(&ReadQuery::scene().limit(MEMORY_ROWS_SHOWN), world, now);
            if rows.is_empty() {
                rows = memory.read(&ReadQuery::default().limit(MEMORY_ROWS_SHOWN), world, now);
            }
            let text = if rows.is_empty() {
                "Aucun souvenir notable pour l'instant.".to_string()
            } else {
                rows.iter()
                    .map(|r| format!("- [{}] {}", r.entity.display(), r.entry.label))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            (world.clone(), answer(text), false)
        }
        SystemCommand::Places => {
            let text = world
                .session_places
                .iter()
                .map(|p| {
                    let marker = if p.id == world.location.id { " (ici)" } else { "" };
                    let lock = if p.restricted { " [accès gardé]" } else { "" };
                    format!("- {}{}{} : {} visite(s)", p.label, marker, lock, p.visits)
                })
                .collect::<Vec<_>>()
                .join("\n");
            (world.clone(), answer(text), false)
        }
        SystemCommand::Help => (world.clone(), answer(help()), false),
        SystemCommand::Reset => {
            let next = reset_world(world, start_label);
            memory.clear();
            info!(session = %world.session_id, "session reset");
            let text = format!("La session repart de zéro à {}.", next.location.label);
            (next, answer(text), true)
        }
        SystemCommand::Unknown(word) => (
            world.clone(),
            answer(format!("Commande inconnue : /{word}.\n{}", help())),
            false,
        ),
    };

    CommandOutput {
        world: next,
        draft,
        reset,
    }
}

fn status(world: &WorldState) -> String {
    let c = &world.conversation;
    let mut lines = vec![
        format!("Lieu : {}", world.location.label),
        format!("Heure : {}", world.time.label()),
        format!(
            "Réputation : {} | Tension locale : {}",
            world.metrics.reputation, world.metrics.local_tension
        ),
    ];
    if let Some(who) = &c.active_interlocutor {
        lines.push(format!("Interlocuteur : {who}"));
    }
    if let Some(travel) = &c.pending_travel {
        lines.push(format!(
            "Trajet en attente : {} ({} min)",
            travel.to.label, travel.duration_min
        ));
    }
    if let Some(access) = &c.pending_access {
        lines.push(format!(
            "Accès en attente : {} ({} essai(s) restant(s))",
            access.target.label,
            access.attempts_left()
        ));
    }
    if let Some(action) = &c.pending_action {
        lines.push(format!("Action en attente : {}", action.label));
    }
    lines.join("\n")
}

fn help() -> String {
    [
        "/status : lieu, heure, réputation, tension et demandes en attente",
        "/memory : souvenirs liés au lieu actuel",
        "/places : lieux connus",
        "/reset : recommencer la session",
        "/help : cette aide",
    ]
    .join("\n")
}
