//! Pure world transitions.
//!
//! Each function takes the current state by reference and returns a new
//! state. Inputs are sanitized, never rejected.

use super::{
    HistoryRecord, LocationRef, Metrics, PendingAccess, PendingAction, PendingTravel,
    ReplyFragments, SceneFrame, SessionPlace, TransitionKind, TravelRecord, WorldState,
    MAX_HISTORY,
};
use crate::intent::IntentType;
use crate::profile::CharacterProfile;
use crate::text::normalize;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest trip a single travel transition may cover (7 days).
pub const MAX_TRAVEL_MINUTES: u32 = 7 * 24 * 60;

/// Largest metric change a single delta may carry.
const MAX_METRIC_STEP: i32 = 200;

const MAX_REASON_CHARS: usize = 160;

// =============================================================================
// Deltas
// =============================================================================

/// A change to the session metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDelta {
    #[serde(default)]
    pub reputation_delta: i32,
    #[serde(default)]
    pub local_tension_delta: i32,
    #[serde(default)]
    pub reason: String,
}

impl WorldDelta {
    pub fn new(reputation_delta: i32, local_tension_delta: i32, reason: impl Into<String>) -> Self {
        Self {
            reputation_delta,
            local_tension_delta,
            reason: reason.into(),
        }
    }

    /// A delta that only advances time.
    pub fn none(reason: impl Into<String>) -> Self {
        Self::new(0, 0, reason)
    }

    pub fn is_noop(&self) -> bool {
        self.reputation_delta == 0 && self.local_tension_delta == 0
    }

    /// Coerce a loosely-typed document into a delta.
    ///
    /// Missing or non-numeric fields become 0; floats are rounded.
    pub fn from_value(value: &Value) -> Self {
        let number = |key: &str| -> i32 {
            value
                .get(key)
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .filter(|n| n.is_finite())
                .map(|n| n.round().clamp(-(MAX_METRIC_STEP as f64), MAX_METRIC_STEP as f64) as i32)
                .unwrap_or(0)
        };
        Self {
            reputation_delta: number("reputationDelta"),
            local_tension_delta: number("localTensionDelta"),
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Metadata attached to a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMeta {
    pub intent_type: IntentType,
    pub transition_id: String,
}

impl TransitionMeta {
    pub fn new(intent_type: IntentType) -> Self {
        Self {
            intent_type,
            transition_id: Uuid::new_v4().to_string(),
        }
    }
}

/// In-game minutes a turn of the given intent takes.
pub fn minutes_for_intent(intent_type: IntentType) -> u32 {
    match intent_type {
        IntentType::SystemCommand => 0,
        IntentType::LoreQuestion => 2,
        IntentType::SocialAction => 8,
        IntentType::FreeExploration | IntentType::StoryAction => 10,
    }
}

/// Apply a metric delta, advance the clock and record the transition.
pub fn apply_world_delta(
    state: &WorldState,
    delta: &WorldDelta,
    meta: &TransitionMeta,
) -> WorldState {
    let mut next = state.clone();
    let reputation_delta = delta.reputation_delta.clamp(-MAX_METRIC_STEP, MAX_METRIC_STEP);
    let local_tension_delta = delta
        .local_tension_delta
        .clamp(-MAX_METRIC_STEP, MAX_METRIC_STEP);

    next.metrics = Metrics {
        reputation: state.metrics.reputation + reputation_delta,
        local_tension: state.metrics.local_tension + local_tension_delta,
    }
    .clamped();

    let minutes = minutes_for_intent(meta.intent_type);
    next.time = state.time.advanced(minutes);

    // Record the clamped change, not the requested one.
    let record = HistoryRecord {
        transition_id: meta.transition_id.clone(),
        kind: TransitionKind::Delta,
        intent_type: Some(meta.intent_type),
        reason: clean_reason(&delta.reason),
        reputation_delta: next.metrics.reputation - state.metrics.reputation,
        local_tension_delta: next.metrics.local_tension - state.metrics.local_tension,
        minutes,
        at_game_min: next.now_game_min(),
    };
    push_history(&mut next, record);

    debug!(
        transition = %meta.transition_id,
        intent = ?meta.intent_type,
        reputation = next.metrics.reputation,
        tension = next.metrics.local_tension,
        minutes,
        "applied world delta"
    );
    next
}

// =============================================================================
// Travel
// =============================================================================

/// A move to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelRequest {
    pub from: LocationRef,
    pub to: LocationRef,
    pub duration_min: u32,
    pub reason: String,
}

impl From<&PendingTravel> for TravelRequest {
    fn from(pending: &PendingTravel) -> Self {
        Self {
            from: pending.from.clone(),
            to: pending.to.clone(),
            duration_min: pending.duration_min,
            reason: pending.reason.clone(),
        }
    }
}

/// Move the player: advance time, replace the location and clear pending travel.
///
/// The interlocutor is released and the scene frame re-anchored at the
/// destination. The destination is recorded as a visited session place.
pub fn apply_travel(state: &WorldState, request: &TravelRequest) -> WorldState {
    let duration = request.duration_min.min(MAX_TRAVEL_MINUTES);
    let to = if request.to.label.trim().is_empty() {
        state.location.clone()
    } else if request.to.id.trim().is_empty() {
        LocationRef::from_label(request.to.label.clone())
    } else {
        request.to.clone()
    };

    let cleared = apply_critical_mutation(
        state,
        &CriticalPatch {
            pending_travel: Patch::Clear,
            active_interlocutor: Patch::Clear,
            ..Default::default()
        },
    );

    let mut next = cleared;
    next.time = state.time.advanced(duration);
    next.location = to.clone();
    let now = next.now_game_min();

    next.travel.last = Some(TravelRecord {
        from: request.from.clone(),
        to: to.clone(),
        duration_min: duration,
        reason: clean_reason(&request.reason),
        arrived_at_game_min: now,
    });
    record_visit(&mut next, &to, now);

    let next = apply_critical_mutation(
        &next,
        &CriticalPatch {
            scene_frame: Patch::Set(SceneFrame::anchored_at(to.id.clone(), to.label.clone())),
            ..Default::default()
        },
    );

    let mut next = next;
    push_history(
        &mut next,
        HistoryRecord {
            transition_id: Uuid::new_v4().to_string(),
            kind: TransitionKind::Travel,
            intent_type: Some(IntentType::StoryAction),
            reason: clean_reason(&request.reason),
            reputation_delta: 0,
            local_tension_delta: 0,
            minutes: duration,
            at_game_min: now,
        },
    );

    debug!(from = %request.from.id, to = %to.id, duration, "applied travel");
    next
}

fn record_visit(state: &mut WorldState, to: &LocationRef, now: i64) {
    match state.session_places.iter_mut().find(|p| p.id == to.id) {
        Some(place) => {
            place.first_visit_game_min.get_or_insert(now);
            place.last_visit_game_min = Some(now);
            place.visits += 1;
        }
        None => {
            let mut place = SessionPlace::new(to.id.clone(), to.label.clone());
            place.first_visit_game_min = Some(now);
            place.last_visit_game_min = Some(now);
            place.visits = 1;
            state.session_places.push(place);
        }
    }
}

// =============================================================================
// Critical mutation
// =============================================================================

/// A change to one conversation slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// Changes to `conversation.*`. Slots left at [`Patch::Keep`] are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriticalPatch {
    pub active_interlocutor: Patch<String>,
    pub pending_action: Patch<PendingAction>,
    pub pending_travel: Patch<PendingTravel>,
    pub pending_access: Patch<PendingAccess>,
    pub scene_frame: Patch<SceneFrame>,
    pub last_valid_reply: Patch<ReplyFragments>,
}

impl CriticalPatch {
    pub fn is_empty(&self) -> bool {
        self.active_interlocutor.is_keep()
            && self.pending_action.is_keep()
            && self.pending_travel.is_keep()
            && self.pending_access.is_keep()
            && self.scene_frame.is_keep()
            && self.last_valid_reply.is_keep()
    }
}

/// The only path that writes `conversation.*`.
///
/// A pending slot holds at most one request: `Set` on an occupied slot is
/// applied only when the ids match (an update of the same request), and
/// ignored otherwise. An interlocutor that names the player or the current
/// location is rejected.
pub fn apply_critical_mutation(state: &WorldState, patch: &CriticalPatch) -> WorldState {
    let mut next = state.clone();
    let player = state.player_name().map(normalize);
    let location = normalize(&state.location.label);

    match &patch.active_interlocutor {
        Patch::Keep => {}
        Patch::Clear => {
            next.conversation.active_interlocutor = None;
            next.conversation.scene_frame.active_interlocutor_label = None;
        }
        Patch::Set(label) => {
            let label = label.trim();
            let key = normalize(label);
            if key.is_empty() || key == location || player.as_deref() == Some(key.as_str()) {
                warn!(label, "rejected self-referencing interlocutor");
            } else {
                next.conversation.active_interlocutor = Some(label.to_string());
                next.conversation.scene_frame.active_interlocutor_label = Some(label.to_string());
            }
        }
    }

    apply_slot(
        &mut next.conversation.pending_action,
        &patch.pending_action,
        |a| &a.id,
        "pending_action",
    );
    apply_slot(
        &mut next.conversation.pending_travel,
        &patch.pending_travel,
        |t| &t.id,
        "pending_travel",
    );
    apply_slot(
        &mut next.conversation.pending_access,
        &patch.pending_access,
        |a| &a.id,
        "pending_access",
    );
    next.travel.pending = next.conversation.pending_travel.clone();

    match &patch.scene_frame {
        Patch::Keep => {}
        Patch::Clear => {
            next.conversation.scene_frame =
                SceneFrame::anchored_at(next.location.id.clone(), next.location.label.clone());
        }
        Patch::Set(frame) => {
            let frame = SceneFrame {
                location_id: next.location.id.clone(),
                location_label: next.location.label.clone(),
                ..frame.clone()
            };
            next.conversation.scene_frame = frame.validated(state.player_name());
            next.conversation.active_interlocutor = next
                .conversation
                .scene_frame
                .active_interlocutor_label
                .clone();
        }
    }

    match &patch.last_valid_reply {
        Patch::Keep => {}
        Patch::Clear => next.conversation.last_valid_reply = ReplyFragments::default(),
        Patch::Set(fragments) => next.conversation.last_valid_reply = fragments.clone(),
    }

    if !patch.is_empty() {
        debug!(
            interlocutor = ?next.conversation.active_interlocutor,
            stage = ?next.narrative_stage(),
            "applied critical mutation"
        );
    }
    next
}

fn apply_slot<T: Clone>(
    slot: &mut Option<T>,
    patch: &Patch<T>,
    id_of: impl Fn(&T) -> &String,
    name: &'static str,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => *slot = None,
        Patch::Set(value) => match slot {
            Some(current) if id_of(current) != id_of(value) => {
                warn!(
                    slot = name,
                    outstanding = %id_of(current),
                    proposed = %id_of(value),
                    "pending slot occupied, new request ignored"
                );
            }
            _ => *slot = Some(value.clone()),
        },
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

/// Explicit reset: a fresh world at `start_label`, keeping the session id,
/// the revision counter and the start context.
pub fn reset_world(state: &WorldState, start_label: &str) -> WorldState {
    let mut next = WorldState::new(state.session_id.clone(), start_label);
    next.revision = state.revision;
    next.start_context = state.start_context.clone();
    let at_game_min = next.now_game_min();
    push_history(
        &mut next,
        HistoryRecord {
            transition_id: Uuid::new_v4().to_string(),
            kind: TransitionKind::Reset,
            intent_type: Some(IntentType::SystemCommand),
            reason: "Réinitialisation de la session".to_string(),
            reputation_delta: 0,
            local_tension_delta: 0,
            minutes: 0,
            at_game_min,
        },
    );
    next
}

/// Flip the intro flag and snapshot the character. No-op once delivered.
pub fn mark_intro_delivered(state: &WorldState, profile: Option<&CharacterProfile>) -> WorldState {
    if state.start_context.intro_delivered {
        return state.clone();
    }
    let mut next = state.clone();
    next.start_context.intro_delivered = true;
    next.start_context.started_at = Some(Utc::now());
    if next.start_context.character.is_none() {
        next.start_context.character = profile.cloned();
    }
    next
}

/// Register a place, keeping visit data of an existing entry.
pub fn declare_place(state: &WorldState, place: SessionPlace) -> WorldState {
    let mut next = state.clone();
    match next.session_places.iter_mut().find(|p| p.id == place.id) {
        Some(existing) => {
            existing.label = place.label;
            existing.restricted = place.restricted;
            existing.access_keyword = place.access_keyword.or(existing.access_keyword.take());
            existing.travel_minutes = place.travel_minutes.or(existing.travel_minutes);
        }
        None => next.session_places.push(place),
    }
    next
}

fn push_history(state: &mut WorldState, record: HistoryRecord) {
    state.history.push(record);
    if state.history.len() > MAX_HISTORY {
        let excess = state.history.len() - MAX_HISTORY;
        state.history.drain(..excess);
    }
}

fn clean_reason(reason: &str) -> String {
    crate::text::truncate_chars(reason.trim(), MAX_REASON_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Commitment, RiskLevel};
    use crate::world::GameTime;

    fn world() -> WorldState {
        WorldState::new("s1", "Place du Marché")
    }

    fn meta(intent: IntentType) -> TransitionMeta {
        TransitionMeta::new(intent)
    }

    #[test]
    fn test_minutes_table() {
        assert_eq!(minutes_for_intent(IntentType::SystemCommand), 0);
        assert_eq!(minutes_for_intent(IntentType::LoreQuestion), 2);
        assert_eq!(minutes_for_intent(IntentType::SocialAction), 8);
        assert_eq!(minutes_for_intent(IntentType::FreeExploration), 10);
        assert_eq!(minutes_for_intent(IntentType::StoryAction), 10);
    }

    #[test]
    fn test_delta_clamps_metrics_and_advances_time() {
        let start = world();
        let next = apply_world_delta(
            &start,
            &WorldDelta::new(1_000, -1_000, "émeute"),
            &meta(IntentType::SocialAction),
        );
        assert_eq!(next.metrics.reputation, 100);
        assert_eq!(next.metrics.local_tension, 0);
        assert_eq!(next.now_game_min() - start.now_game_min(), 8);
        assert_eq!(next.history.len(), 1);
        assert_eq!(next.history[0].reputation_delta, 100);
        // input untouched
        assert_eq!(start.metrics.reputation, 0);
    }

    #[test]
    fn test_metric_bounds_for_extreme_sequences() {
        let mut state = world();
        for step in [i32::MAX, i32::MIN, 57, -300, 99, i32::MIN + 1] {
            state = apply_world_delta(
                &state,
                &WorldDelta::new(step, step.wrapping_neg(), ""),
                &meta(IntentType::StoryAction),
            );
            assert!((-100..=100).contains(&state.metrics.reputation));
            assert!((0..=100).contains(&state.metrics.local_tension));
        }
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mut state = world();
        for _ in 0..(MAX_HISTORY + 15) {
            state = apply_world_delta(&state, &WorldDelta::none("tick"), &meta(IntentType::LoreQuestion));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_time_is_monotonic() {
        let mut state = world();
        let mut last = state.now_game_min();
        for i in 0..30u32 {
            state = if i % 3 == 0 {
                apply_travel(
                    &state,
                    &TravelRequest {
                        from: state.location.clone(),
                        to: LocationRef::from_label(format!("Lieu {i}")),
                        duration_min: i * 17,
                        reason: String::new(),
                    },
                )
            } else {
                apply_world_delta(&state, &WorldDelta::none(""), &meta(IntentType::SocialAction))
            };
            assert!(state.now_game_min() >= last);
            last = state.now_game_min();
        }
    }

    #[test]
    fn test_travel_replaces_location_and_clears_pending() {
        let start = world();
        let pending = PendingTravel::new(
            start.location.clone(),
            LocationRef::from_label("Port Est"),
            3,
            start.now_game_min(),
        );
        let state = apply_critical_mutation(
            &start,
            &CriticalPatch {
                pending_travel: Patch::Set(pending.clone()),
                active_interlocutor: Patch::Set("Garde".to_string()),
                ..Default::default()
            },
        );
        assert!(state.travel.pending.is_some());

        let next = apply_travel(&state, &TravelRequest::from(&pending));
        assert_eq!(next.location.label, "Port Est");
        assert!(next.conversation.pending_travel.is_none());
        assert!(next.travel.pending.is_none());
        assert_eq!(next.now_game_min() - state.now_game_min(), 3);
        assert_eq!(next.conversation.active_interlocutor, None);
        assert_eq!(next.conversation.scene_frame.location_id, "port-est");
        assert_eq!(next.travel.last.as_ref().map(|t| t.duration_min), Some(3));
        assert_eq!(next.place("port-est").map(|p| p.visits), Some(1));
    }

    #[test]
    fn test_travel_duration_is_capped() {
        let next = apply_travel(
            &world(),
            &TravelRequest {
                from: LocationRef::from_label("A"),
                to: LocationRef::from_label("B"),
                duration_min: u32::MAX,
                reason: String::new(),
            },
        );
        assert_eq!(
            next.time,
            GameTime::new(1, 8, 0).advanced(MAX_TRAVEL_MINUTES)
        );
    }

    #[test]
    fn test_occupied_pending_slot_is_not_overwritten() {
        let start = world();
        let first = PendingAction::new(
            "forcer la porte",
            IntentType::StoryAction,
            Commitment::Declaratif,
            RiskLevel::High,
            None,
            0,
        );
        let second = PendingAction::new(
            "voler la bourse",
            IntentType::StoryAction,
            Commitment::Volitif,
            RiskLevel::High,
            None,
            0,
        );
        let state = apply_critical_mutation(
            &start,
            &CriticalPatch {
                pending_action: Patch::Set(first.clone()),
                ..Default::default()
            },
        );
        let state = apply_critical_mutation(
            &state,
            &CriticalPatch {
                pending_action: Patch::Set(second),
                ..Default::default()
            },
        );
        assert_eq!(state.conversation.pending_action.as_ref(), Some(&first));

        let cleared = apply_critical_mutation(
            &state,
            &CriticalPatch {
                pending_action: Patch::Clear,
                ..Default::default()
            },
        );
        assert!(cleared.conversation.pending_action.is_none());
    }

    #[test]
    fn test_interlocutor_self_reference_rejected() {
        let mut start = world();
        start.start_context.character = Some(CharacterProfile::named("Aelys"));
        for label in ["Aëlys", "place du marche", "  "] {
            let next = apply_critical_mutation(
                &start,
                &CriticalPatch {
                    active_interlocutor: Patch::Set(label.to_string()),
                    ..Default::default()
                },
            );
            assert_eq!(next.conversation.active_interlocutor, None, "{label}");
        }
    }

    #[test]
    fn test_delta_from_value_sanitizes() {
        let value = serde_json::json!({
            "reputationDelta": "3",
            "localTensionDelta": 2.6,
            "reason": 12
        });
        let delta = WorldDelta::from_value(&value);
        assert_eq!(delta, WorldDelta::new(3, 3, ""));
        assert_eq!(WorldDelta::from_value(&Value::Null), WorldDelta::default());
    }

    #[test]
    fn test_reset_keeps_start_context() {
        let mut start = world();
        start.start_context.intro_delivered = true;
        let moved = apply_travel(
            &start,
            &TravelRequest {
                from: start.location.clone(),
                to: LocationRef::from_label("Port Est"),
                duration_min: 90,
                reason: String::new(),
            },
        );
        let reset = reset_world(&moved, "Place du Marché");
        assert_eq!(reset.time, GameTime::default());
        assert_eq!(reset.location.id, "place-du-marche");
        assert!(reset.start_context.intro_delivered);
        assert_eq!(reset.history.len(), 1);
    }

    #[test]
    fn test_declare_place_keeps_visits() {
        let start = world();
        let next = declare_place(
            &start,
            SessionPlace::new("place-du-marche", "Place du Marché").with_travel_minutes(5),
        );
        let place = next.place("place-du-marche").unwrap();
        assert_eq!(place.visits, 1);
        assert_eq!(place.travel_minutes, Some(5));
    }
}
