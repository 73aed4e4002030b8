//! The per-session world document.
//!
//! [`WorldState`] is plain data. Every change goes through the pure
//! transition functions in [`mutation`], which take the old state by
//! reference and return a new one.

mod mutation;
mod pending;
mod scene;
mod time;

pub use mutation::{
    apply_critical_mutation, apply_travel, apply_world_delta, declare_place, mark_intro_delivered,
    minutes_for_intent, reset_world, CriticalPatch, Patch, TransitionMeta, TravelRequest,
    WorldDelta, MAX_TRAVEL_MINUTES,
};
pub use pending::{LocationRef, PendingAccess, PendingAction, PendingTravel, DEFAULT_MAX_ACCESS_ATTEMPTS};
pub use scene::{NarrativeStage, ReplyFragments, SceneFrame, MAX_RECENT_FACTS};
pub use time::{GameTime, MINUTES_PER_DAY};

use crate::intent::IntentType;
use crate::profile::CharacterProfile;
use crate::text::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Current world document version.
pub const WORLD_DOC_VERSION: u32 = 1;

/// History records kept in the ring buffer.
pub const MAX_HISTORY: usize = 120;

pub const REPUTATION_RANGE: (i32, i32) = (-100, 100);
pub const TENSION_RANGE: (i32, i32) = (0, 100);

/// Reputation and local tension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub reputation: i32,
    pub local_tension: i32,
}

impl Metrics {
    pub fn clamped(self) -> Self {
        Self {
            reputation: self.reputation.clamp(REPUTATION_RANGE.0, REPUTATION_RANGE.1),
            local_tension: self.local_tension.clamp(TENSION_RANGE.0, TENSION_RANGE.1),
        }
    }
}

/// One-time session start bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartContext {
    pub intro_delivered: bool,
    #[serde(default)]
    pub character: Option<CharacterProfile>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Conversation fields. Written only through [`apply_critical_mutation`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub active_interlocutor: Option<String>,
    #[serde(default)]
    pub pending_action: Option<PendingAction>,
    #[serde(default)]
    pub pending_travel: Option<PendingTravel>,
    #[serde(default)]
    pub pending_access: Option<PendingAccess>,
    #[serde(default)]
    pub scene_frame: SceneFrame,
    #[serde(default)]
    pub last_valid_reply: ReplyFragments,
}

/// A completed trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelRecord {
    pub from: LocationRef,
    pub to: LocationRef,
    pub duration_min: u32,
    pub reason: String,
    pub arrived_at_game_min: i64,
}

/// Travel bookkeeping. `pending` mirrors `conversation.pending_travel`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelState {
    #[serde(default)]
    pub pending: Option<PendingTravel>,
    #[serde(default)]
    pub last: Option<TravelRecord>,
}

/// A place known to this session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlace {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub first_visit_game_min: Option<i64>,
    #[serde(default)]
    pub last_visit_game_min: Option<i64>,
    #[serde(default)]
    pub visits: u32,
    /// Entering requires passing an access challenge.
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub access_keyword: Option<String>,
    /// Known travel time from anywhere in town.
    #[serde(default)]
    pub travel_minutes: Option<u32>,
}

impl SessionPlace {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            first_visit_game_min: None,
            last_visit_game_min: None,
            visits: 0,
            restricted: false,
            access_keyword: None,
            travel_minutes: None,
        }
    }

    pub fn from_label(label: impl Into<String>) -> Self {
        let loc = LocationRef::from_label(label);
        Self::new(loc.id, loc.label)
    }

    pub fn restricted(mut self, keyword: impl Into<String>) -> Self {
        self.restricted = true;
        self.access_keyword = Some(keyword.into());
        self
    }

    pub fn with_travel_minutes(mut self, minutes: u32) -> Self {
        self.travel_minutes = Some(minutes);
        self
    }

    pub fn location(&self) -> LocationRef {
        LocationRef::new(self.id.clone(), self.label.clone())
    }
}

/// What kind of transition produced a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Delta,
    Travel,
    Reset,
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub transition_id: String,
    pub kind: TransitionKind,
    #[serde(default)]
    pub intent_type: Option<IntentType>,
    pub reason: String,
    #[serde(default)]
    pub reputation_delta: i32,
    #[serde(default)]
    pub local_tension_delta: i32,
    #[serde(default)]
    pub minutes: u32,
    pub at_game_min: i64,
}

/// The canonical per-session world document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    pub version: u32,
    pub session_id: String,
    /// Bumped on every persisted state change.
    #[serde(default)]
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    pub time: GameTime,
    pub metrics: Metrics,
    pub location: LocationRef,
    #[serde(default)]
    pub start_context: StartContext,
    #[serde(default)]
    pub conversation: ConversationState,
    #[serde(default)]
    pub travel: TravelState,
    #[serde(default)]
    pub session_places: Vec<SessionPlace>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

impl WorldState {
    /// A fresh world at `start_label`, day 1, 08:00.
    pub fn new(session_id: impl Into<String>, start_label: &str) -> Self {
        let location = LocationRef::from_label(start_label);
        let mut start_place = SessionPlace::new(location.id.clone(), location.label.clone());
        let time = GameTime::default();
        start_place.first_visit_game_min = Some(time.absolute_minutes());
        start_place.last_visit_game_min = Some(time.absolute_minutes());
        start_place.visits = 1;

        Self {
            version: WORLD_DOC_VERSION,
            session_id: session_id.into(),
            revision: 0,
            updated_at: Utc::now(),
            time,
            metrics: Metrics::default(),
            conversation: ConversationState {
                scene_frame: SceneFrame::anchored_at(location.id.clone(), location.label.clone()),
                ..Default::default()
            },
            location,
            start_context: StartContext::default(),
            travel: TravelState::default(),
            session_places: vec![start_place],
            history: Vec::new(),
        }
    }

    /// Current in-game time in absolute minutes.
    pub fn now_game_min(&self) -> i64 {
        self.time.absolute_minutes()
    }

    /// The player's name, if a character was snapshotted.
    pub fn player_name(&self) -> Option<&str> {
        self.start_context
            .character
            .as_ref()
            .map(|c| c.name.as_str())
            .filter(|n| !n.trim().is_empty())
    }

    pub fn has_pending_gate(&self) -> bool {
        self.conversation.pending_travel.is_some()
            || self.conversation.pending_access.is_some()
            || self.conversation.pending_action.is_some()
    }

    /// Stage derived from the outstanding gates, in resolution order.
    pub fn narrative_stage(&self) -> NarrativeStage {
        let c = &self.conversation;
        if c.pending_travel.is_some() {
            NarrativeStage::TravelProposal
        } else if c.pending_access.is_some() {
            NarrativeStage::AccessChallenge
        } else if c.pending_action.is_some() {
            NarrativeStage::ActionConfirmation
        } else if c.active_interlocutor.is_some() {
            NarrativeStage::Conversation
        } else {
            NarrativeStage::Exploration
        }
    }

    pub fn place(&self, id: &str) -> Option<&SessionPlace> {
        self.session_places.iter().find(|p| p.id == id)
    }

    /// Find a known place by label, ignoring case and accents.
    pub fn place_by_label(&self, label: &str) -> Option<&SessionPlace> {
        let wanted = normalize(label);
        if wanted.is_empty() {
            return None;
        }
        self.session_places
            .iter()
            .find(|p| normalize(&p.label) == wanted || p.id == crate::text::slugify(label))
    }

    /// Fold malformed fields of a loaded document into safe values.
    pub fn sanitized(mut self) -> Self {
        self.time = self.time.sanitized();
        self.metrics = self.metrics.clamped();
        if self.location.id.trim().is_empty() {
            self.location = LocationRef::from_label(self.location.label.clone());
        }
        let player = self.player_name().map(str::to_string);
        let frame = std::mem::take(&mut self.conversation.scene_frame);
        self.conversation.scene_frame = SceneFrame {
            location_id: self.location.id.clone(),
            location_label: self.location.label.clone(),
            ..frame
        }
        .validated(player.as_deref());
        if self.conversation.scene_frame.active_interlocutor_label.is_none() {
            self.conversation.active_interlocutor = None;
        }
        self.travel.pending = self.conversation.pending_travel.clone();
        if let Some(access) = self.conversation.pending_access.as_mut() {
            access.max_attempts = access.max_attempts.max(1);
        }
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self
    }

    /// Compact view used by `get_world_state` and oracle context documents.
    pub fn summary(&self) -> Value {
        let c = &self.conversation;
        json!({
            "sessionId": self.session_id,
            "time": {
                "day": self.time.day,
                "hour": self.time.hour,
                "minute": self.time.minute,
                "label": self.time.label(),
                "timeOfDay": self.time.time_of_day(),
            },
            "location": self.location,
            "metrics": self.metrics,
            "narrativeStage": self.narrative_stage(),
            "activeInterlocutor": c.active_interlocutor,
            "pendingTravel": c.pending_travel.as_ref().map(|t| json!({
                "to": t.to.label,
                "durationMin": t.duration_min,
            })),
            "pendingAccess": c.pending_access.as_ref().map(|a| json!({
                "target": a.target.label,
                "challenge": a.challenge,
                "attemptsLeft": a.attempts_left(),
            })),
            "pendingAction": c.pending_action.as_ref().map(|a| json!({
                "label": a.label,
                "riskLevel": a.risk_level,
            })),
            "sceneFrame": c.scene_frame,
            "knownPlaces": self.session_places.iter().map(|p| p.label.as_str()).collect::<Vec<_>>(),
        })
    }
}
