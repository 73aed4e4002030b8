//! The session memory document and its read/write operations.

use super::decay::{decay_passively, effective_interest, touch};
use super::entry::{EntityKind, EntryStatus, MemoryEntry, MemoryRow};
use crate::text::{normalize, slugify};
use crate::world::WorldState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Current memory document version.
pub const MEMORY_DOC_VERSION: u32 = 1;

/// Audit records kept.
pub const MAX_MEMORY_HISTORY: usize = 120;

/// Entries kept per kind; the least interesting are evicted beyond this.
pub const MAX_ENTRIES_PER_KIND: usize = 200;

pub const DEFAULT_READ_LIMIT: usize = 8;
pub const MAX_READ_LIMIT: usize = 50;

// =============================================================================
// Operations
// =============================================================================

/// Which rows a read considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadScope {
    #[default]
    All,
    /// Only rows placed at the current world location.
    SceneMemory,
}

/// A memory read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadQuery {
    pub entity: Option<EntityKind>,
    pub query: Option<String>,
    pub scope: ReadScope,
    pub limit: Option<usize>,
}

impl ReadQuery {
    pub fn scene() -> Self {
        Self {
            scope: ReadScope::SceneMemory,
            ..Default::default()
        }
    }

    pub fn entity(mut self, entity: EntityKind) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn matching(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Writer-settable data keys. Unset fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPatch {
    pub location_id: Option<String>,
    pub location_label: Option<String>,
    pub interaction_weight: Option<f64>,
    pub ttl_game_hours: Option<f64>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub entity: EntityKind,
    pub id: Option<String>,
    pub label: String,
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub status: Option<EntryStatus>,
    /// Real-time lifetime.
    pub ttl_seconds: Option<i64>,
    pub data: DataPatch,
}

impl UpsertOp {
    pub fn new(entity: EntityKind, label: impl Into<String>) -> Self {
        Self {
            entity,
            id: None,
            label: label.into(),
            text: None,
            tags: Vec::new(),
            source: None,
            status: None,
            ttl_seconds: None,
            data: DataPatch::default(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.data.interaction_weight = Some(weight);
        self
    }

    pub fn with_ttl_game_hours(mut self, hours: f64) -> Self {
        self.data.ttl_game_hours = Some(hours);
        self
    }

    pub fn at_location(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.data.location_id = Some(id.into());
        self.data.location_label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOp {
    pub entity: EntityKind,
    pub id: Option<String>,
    pub label: Option<String>,
}

/// One write operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryOp {
    Upsert(UpsertOp),
    Delete(DeleteOp),
}

/// What a write did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOp {
    pub op: String,
    pub entity: EntityKind,
    pub id: String,
    pub label: String,
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReport {
    pub applied: Vec<AppliedOp>,
    pub evicted: usize,
}

/// Audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHistoryRecord {
    pub op: String,
    pub entity: EntityKind,
    pub id: String,
    pub label: String,
    pub at_game_min: i64,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Document
// =============================================================================

/// The per-session memory document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMemory {
    pub version: u32,
    pub session_id: String,
    #[serde(default)]
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entities: BTreeMap<EntityKind, Vec<MemoryEntry>>,
    #[serde(default)]
    pub history: Vec<MemoryHistoryRecord>,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            version: MEMORY_DOC_VERSION,
            session_id: session_id.into(),
            revision: 0,
            updated_at: Utc::now(),
            entities: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Stored entries of one kind, expired ones included.
    pub fn entries(&self, entity: EntityKind) -> &[MemoryEntry] {
        self.entities.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, keeping the session id and revision.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.history.clear();
    }

    /// Live rows matching `query`, most relevant first.
    ///
    /// Expired rows are filtered out even when no sweep has run yet.
    pub fn read(&self, query: &ReadQuery, world: &WorldState, now: DateTime<Utc>) -> Vec<MemoryRow> {
        let now_game_min = world.now_game_min();
        let needle = query
            .query
            .as_deref()
            .map(normalize)
            .filter(|q| !q.is_empty());
        let words: Vec<&str> = needle
            .as_deref()
            .map(|q| q.split_whitespace().filter(|w| w.len() > 2).collect())
            .unwrap_or_default();
        let limit = query
            .limit
            .unwrap_or(DEFAULT_READ_LIMIT)
            .clamp(1, MAX_READ_LIMIT);

        let mut scored: Vec<(usize, f64, &MemoryEntry, EntityKind)> = Vec::new();
        for (kind, entries) in &self.entities {
            if query.entity.is_some_and(|e| e != *kind) {
                continue;
            }
            for entry in entries {
                if entry.is_expired(now_game_min, now) {
                    continue;
                }
                if query.scope == ReadScope::SceneMemory
                    && !entry.is_at(&world.location.id, &world.location.label)
                {
                    continue;
                }
                let matches = match &needle {
                    None => 1,
                    Some(needle) => match_score(entry, needle, &words),
                };
                if matches == 0 {
                    continue;
                }
                scored.push((
                    matches,
                    effective_interest(&entry.data, now_game_min),
                    entry,
                    *kind,
                ));
            }
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
                .then(b.2.data.last_seen_at_game_min.cmp(&a.2.data.last_seen_at_game_min))
        });

        scored
            .into_iter()
            .take(limit)
            .map(|(_, _, entry, entity)| MemoryRow {
                entity,
                entry: entry.clone(),
            })
            .collect()
    }

    /// Sweep, then apply `ops` in order.
    pub fn write(&mut self, ops: &[MemoryOp], world: &WorldState, now: DateTime<Utc>) -> WriteReport {
        let now_game_min = world.now_game_min();
        let evicted = self.sweep(now_game_min, now);
        let mut applied = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                MemoryOp::Upsert(upsert) => {
                    applied.push(self.upsert(upsert, world, now));
                }
                MemoryOp::Delete(delete) => {
                    if let Some(done) = self.delete(delete, now_game_min, now) {
                        applied.push(done);
                    }
                }
            }
        }

        let evicted = evicted + self.enforce_capacity(now_game_min);
        if !applied.is_empty() || evicted > 0 {
            self.updated_at = now;
        }
        debug!(applied = applied.len(), evicted, "session memory write");
        WriteReport { applied, evicted }
    }

    /// Evict expired rows and decay the rest. Returns the number evicted.
    pub fn sweep(&mut self, now_game_min: i64, now: DateTime<Utc>) -> usize {
        let mut evicted = Vec::new();
        for (kind, entries) in self.entities.iter_mut() {
            entries.retain_mut(|entry| {
                if entry.is_expired(now_game_min, now) {
                    evicted.push((*kind, entry.id.clone(), entry.label.clone()));
                    false
                } else {
                    decay_passively(&mut entry.data, now_game_min);
                    true
                }
            });
        }
        self.entities.retain(|_, entries| !entries.is_empty());
        let count = evicted.len();
        for (kind, id, label) in evicted {
            self.record("evict", kind, id, label, now_game_min, now);
        }
        count
    }

    fn upsert(&mut self, op: &UpsertOp, world: &WorldState, now: DateTime<Utc>) -> AppliedOp {
        let now_game_min = world.now_game_min();
        let (location_id, location_label) = resolve_location(op, world);
        let entries = self.entities.entry(op.entity).or_default();

        let position = match &op.id {
            Some(id) => entries.iter().position(|e| &e.id == id),
            None => {
                let key = normalize(&op.label);
                entries.iter().position(|e| {
                    normalize(&e.label) == key
                        && match (&location_id, &e.data.location_id) {
                            (Some(a), Some(b)) => a == b,
                            _ => true,
                        }
                })
            }
        };

        let created = position.is_none();
        let index = match position {
            Some(index) => index,
            None => {
                let mut entry = MemoryEntry::new(op.label.trim(), now_game_min, now);
                if let Some(id) = &op.id {
                    entry.id = id.clone();
                }
                entry.data.ttl_game_hours = op.entity.base_ttl_hours();
                entry.data.location_id = location_id.clone();
                entry.data.location_label = location_label.clone();
                entries.push(entry);
                entries.len() - 1
            }
        };

        let entry = &mut entries[index];
        if !op.label.trim().is_empty() {
            entry.label = op.label.trim().to_string();
        }
        if let Some(text) = op.text.as_deref().filter(|t| !t.trim().is_empty()) {
            entry.text = text.trim().to_string();
        }
        for tag in &op.tags {
            if !entry.tags.iter().any(|t| normalize(t) == normalize(tag)) {
                entry.tags.push(tag.clone());
            }
        }
        if let Some(source) = &op.source {
            entry.source = source.clone();
        }
        if let Some(status) = op.status {
            entry.status = status;
        }
        if location_id.is_some() {
            entry.data.location_id = location_id;
        }
        if location_label.is_some() {
            entry.data.location_label = location_label;
        }
        if let Some(hours) = op.data.ttl_game_hours {
            entry.data.ttl_game_hours = hours;
        }
        for (key, value) in &op.data.extra {
            entry.data.extra.insert(key.clone(), value.clone());
        }
        // An expiry chrono cannot represent leaves the entry without one.
        let expiry = op
            .ttl_seconds
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl));
        if let Some(candidate) = expiry {
            entry.expires_at = Some(entry.expires_at.map_or(candidate, |at| at.max(candidate)));
        }

        let weight = op
            .data
            .interaction_weight
            .unwrap_or(entry.data.interaction_weight);
        touch(&mut entry.data, weight, now_game_min);
        entry.updated_at = now;

        let applied = AppliedOp {
            op: "upsert".to_string(),
            entity: op.entity,
            id: entry.id.clone(),
            label: entry.label.clone(),
            created,
        };
        self.record(
            "upsert",
            op.entity,
            applied.id.clone(),
            applied.label.clone(),
            now_game_min,
            now,
        );
        applied
    }

    fn delete(&mut self, op: &DeleteOp, now_game_min: i64, now: DateTime<Utc>) -> Option<AppliedOp> {
        let entries = self.entities.get_mut(&op.entity)?;
        let position = match (&op.id, &op.label) {
            (Some(id), _) => entries.iter().position(|e| &e.id == id),
            (None, Some(label)) => {
                let key = normalize(label);
                entries.iter().position(|e| normalize(&e.label) == key)
            }
            (None, None) => None,
        }?;
        let removed = entries.remove(position);
        if entries.is_empty() {
            self.entities.remove(&op.entity);
        }
        self.record(
            "delete",
            op.entity,
            removed.id.clone(),
            removed.label.clone(),
            now_game_min,
            now,
        );
        Some(AppliedOp {
            op: "delete".to_string(),
            entity: op.entity,
            id: removed.id,
            label: removed.label,
            created: false,
        })
    }

    fn enforce_capacity(&mut self, now_game_min: i64) -> usize {
        let mut evicted = 0;
        for entries in self.entities.values_mut() {
            if entries.len() <= MAX_ENTRIES_PER_KIND {
                continue;
            }
            entries.sort_by(|a, b| {
                effective_interest(&b.data, now_game_min)
                    .partial_cmp(&effective_interest(&a.data, now_game_min))
                    .unwrap_or(Ordering::Equal)
                    .then(b.data.last_seen_at_game_min.cmp(&a.data.last_seen_at_game_min))
            });
            evicted += entries.len() - MAX_ENTRIES_PER_KIND;
            entries.truncate(MAX_ENTRIES_PER_KIND);
        }
        evicted
    }

    fn record(
        &mut self,
        op: &str,
        entity: EntityKind,
        id: String,
        label: String,
        at_game_min: i64,
        at: DateTime<Utc>,
    ) {
        self.history.push(MemoryHistoryRecord {
            op: op.to_string(),
            entity,
            id,
            label,
            at_game_min,
            at,
        });
        if self.history.len() > MAX_MEMORY_HISTORY {
            let excess = self.history.len() - MAX_MEMORY_HISTORY;
            self.history.drain(..excess);
        }
    }
}

/// Location an upsert is attached to.
///
/// Places locate themselves; other kinds default to the current location.
fn resolve_location(op: &UpsertOp, world: &WorldState) -> (Option<String>, Option<String>) {
    if op.data.location_id.is_some() || op.data.location_label.is_some() {
        let id = op
            .data
            .location_id
            .clone()
            .or_else(|| op.data.location_label.as_deref().map(slugify));
        return (id, op.data.location_label.clone());
    }
    match op.entity {
        EntityKind::Place => {
            let label = op.label.trim().to_string();
            (Some(slugify(&label)), Some(label))
        }
        _ => (
            Some(world.location.id.clone()),
            Some(world.location.label.clone()),
        ),
    }
}

fn match_score(entry: &MemoryEntry, needle: &str, words: &[&str]) -> usize {
    let label = normalize(&entry.label);
    let haystack = format!(
        "{} {} {}",
        label,
        normalize(&entry.text),
        normalize(&entry.tags.join(" "))
    );
    let mut score = 0;
    if label == needle {
        score += 10;
    }
    if haystack.contains(needle) {
        score += 5;
    }
    score + words.iter().filter(|w| haystack.contains(*w)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{apply_travel, apply_world_delta, LocationRef, TransitionMeta, TravelRequest, WorldDelta};
    use crate::intent::IntentType;

    fn world() -> WorldState {
        WorldState::new("s1", "Port Est")
    }

    fn advance_hours(world: &WorldState, hours: u32) -> WorldState {
        apply_travel(
            world,
            &TravelRequest {
                from: world.location.clone(),
                to: world.location.clone(),
                duration_min: hours * 60,
                reason: "attente".to_string(),
            },
        )
    }

    #[test]
    fn test_upsert_twice_yields_one_row() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let op = MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Garde").with_text("Un garde bourru"));
        let now = Utc::now();

        let first = memory.write(&[op.clone()], &w, now);
        let second = memory.write(&[op], &w, now);

        assert!(first.applied[0].created);
        assert!(!second.applied[0].created);
        assert_eq!(memory.entries(EntityKind::Npc).len(), 1);
        assert_eq!(memory.entries(EntityKind::Npc)[0].data.interaction_count, 2);
    }

    #[test]
    fn test_label_match_ignores_case_and_accents() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(&[MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Élise"))], &w, now);
        memory.write(&[MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "elise "))], &w, now);
        assert_eq!(memory.entries(EntityKind::Npc).len(), 1);
    }

    #[test]
    fn test_same_label_different_location_is_distinct() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(
            &[
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Garde").at_location("port-est", "Port Est")),
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Garde").at_location("marche", "Marché")),
            ],
            &w,
            now,
        );
        assert_eq!(memory.entries(EntityKind::Npc).len(), 2);
    }

    #[test]
    fn test_entry_with_24h_ttl_gone_after_30h() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(
            &[MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Garde").with_ttl_game_hours(24.0))],
            &w,
            now,
        );
        assert_eq!(memory.read(&ReadQuery::default(), &w, now).len(), 1);

        let later = advance_hours(&w, 30);
        assert!(memory.read(&ReadQuery::default(), &later, now).is_empty());

        let report = memory.write(&[], &later, now);
        assert_eq!(report.evicted, 1);
        assert!(memory.is_empty());
        assert_eq!(memory.history.last().map(|h| h.op.as_str()), Some("evict"));
    }

    #[test]
    fn test_expiry_never_shrinks_across_upserts() {
        let mut w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        let mut last = 0;
        for weight in [2.5, 0.0, 0.1, 0.0] {
            memory.write(
                &[MemoryOp::Upsert(UpsertOp::new(EntityKind::Fact, "Le pont est gardé").with_weight(weight))],
                &w,
                now,
            );
            let expires = memory.entries(EntityKind::Fact)[0].data.expires_at_game_min;
            assert!(expires >= last);
            last = expires;
            w = apply_world_delta(&w, &WorldDelta::none(""), &TransitionMeta::new(IntentType::StoryAction));
        }
    }

    #[test]
    fn test_scene_scope_filters_by_location() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(
            &[
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Garde")),
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Marchande").at_location("marche", "Marché")),
            ],
            &w,
            now,
        );

        let rows = memory.read(&ReadQuery::scene(), &w, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.label, "Garde");

        let moved = apply_travel(
            &w,
            &TravelRequest {
                from: w.location.clone(),
                to: LocationRef::new("marche", "Marché"),
                duration_min: 5,
                reason: String::new(),
            },
        );
        let rows = memory.read(&ReadQuery::scene(), &moved, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.label, "Marchande");
    }

    #[test]
    fn test_query_ranks_label_match_first() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(
            &[
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Rumor, "Contrebande").with_text("On parle du capitaine")),
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Npc, "Capitaine").with_weight(0.1)),
                MemoryOp::Upsert(UpsertOp::new(EntityKind::Fact, "La marée monte")),
            ],
            &w,
            now,
        );
        let rows = memory.read(&ReadQuery::default().matching("capitaine"), &w, now);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entry.label, "Capitaine");
    }

    #[test]
    fn test_delete_by_label() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        memory.write(&[MemoryOp::Upsert(UpsertOp::new(EntityKind::Debt, "Dette envers Ovan"))], &w, now);
        let report = memory.write(
            &[MemoryOp::Delete(DeleteOp {
                entity: EntityKind::Debt,
                id: None,
                label: Some("dette envers ovan".to_string()),
            })],
            &w,
            now,
        );
        assert_eq!(report.applied.len(), 1);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_real_time_ttl_evicts() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        let mut op = UpsertOp::new(EntityKind::Rumor, "Un navire noir");
        op.ttl_seconds = Some(60);
        memory.write(&[MemoryOp::Upsert(op)], &w, now);
        assert_eq!(memory.read(&ReadQuery::default(), &w, now).len(), 1);
        let later = now + Duration::seconds(61);
        assert!(memory.read(&ReadQuery::default(), &w, later).is_empty());
    }

    #[test]
    fn test_out_of_range_ttl_is_ignored() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        let now = Utc::now();
        for (label, seconds) in [("Rumeur lointaine", i64::MAX), ("Rumeur ancienne", i64::MIN)] {
            let mut op = UpsertOp::new(EntityKind::Rumor, label);
            op.ttl_seconds = Some(seconds);
            memory.write(&[MemoryOp::Upsert(op)], &w, now);
        }
        let rumors = memory.entries(EntityKind::Rumor);
        assert_eq!(rumors.len(), 2);
        assert!(rumors.iter().all(|e| e.expires_at.is_none()));
    }

    #[test]
    fn test_place_locates_itself() {
        let w = world();
        let mut memory = SessionMemory::new("s1");
        memory.write(&[MemoryOp::Upsert(UpsertOp::new(EntityKind::Place, "Tour Noire"))], &w, Utc::now());
        let entry = &memory.entries(EntityKind::Place)[0];
        assert_eq!(entry.data.location_id.as_deref(), Some("tour-noire"));
    }
}
