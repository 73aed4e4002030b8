//! Per-session document persistence.
//!
//! Each session owns two JSON documents: the world and the memory. Loading
//! is lenient: malformed gates, frames and memory entries are repaired or
//! dropped instead of failing the whole document. Only a version mismatch
//! or a structurally broken document is an error.

use crate::error::StoreError;
use crate::memory::{MemoryHistoryRecord, SessionMemory, MEMORY_DOC_VERSION};
use crate::sanitize::{
    parse_entity_kind, parse_memory_entry, parse_pending_access, parse_pending_action,
    parse_pending_travel, parse_scene_frame,
};
use crate::world::{WorldState, WORLD_DOC_VERSION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

const WORLD_FILE: &str = "world.json";
const MEMORY_FILE: &str = "memory.json";
const MAX_SESSION_ID_CHARS: usize = 64;

/// Where session documents live.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_world(&self, session_id: &str) -> Result<Option<WorldState>, StoreError>;

    async fn save_world(&self, world: &WorldState) -> Result<(), StoreError>;

    async fn load_memory(&self, session_id: &str) -> Result<Option<SessionMemory>, StoreError>;

    async fn save_memory(&self, memory: &SessionMemory) -> Result<(), StoreError>;

    /// Known session ids, sorted.
    async fn list_sessions(&self) -> Result<Vec<String>, StoreError>;
}

/// Session id usable as a directory name.
pub fn safe_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SESSION_ID_CHARS)
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "default".to_string()
    } else {
        cleaned
    }
}

fn check_version(value: &Value, expected: u32) -> Result<(), StoreError> {
    let found = value.get("version").and_then(Value::as_u64).unwrap_or(0) as u32;
    if found != expected {
        return Err(StoreError::VersionMismatch { expected, found });
    }
    Ok(())
}

/// Replace `key` in `obj` with its sanitized form, or null when unusable.
fn repair_field<T: Serialize, E: std::fmt::Display>(
    obj: &mut serde_json::Map<String, Value>,
    key: &str,
    parse: impl Fn(&Value) -> Result<T, E>,
) {
    let Some(raw) = obj.get(key) else {
        return;
    };
    if raw.is_null() {
        return;
    }
    let repaired = match parse(raw) {
        Ok(parsed) => serde_json::to_value(parsed).unwrap_or(Value::Null),
        Err(e) => {
            warn!(field = key, error = %e, "dropping malformed field");
            Value::Null
        }
    };
    obj.insert(key.to_string(), repaired);
}

/// Parse a stored world document.
pub fn world_from_value(mut value: Value, session_id: &str) -> Result<WorldState, StoreError> {
    check_version(&value, WORLD_DOC_VERSION)?;

    if let Some(conversation) = value.get_mut("conversation").and_then(Value::as_object_mut) {
        repair_field(conversation, "pendingTravel", parse_pending_travel);
        repair_field(conversation, "pendingAccess", parse_pending_access);
        repair_field(conversation, "pendingAction", parse_pending_action);
        repair_field(conversation, "sceneFrame", parse_scene_frame);
        if conversation.get("sceneFrame").is_some_and(Value::is_null) {
            conversation.remove("sceneFrame");
        }
    }
    if let Some(travel) = value.get_mut("travel").and_then(Value::as_object_mut) {
        repair_field(travel, "pending", parse_pending_travel);
    }

    let mut world: WorldState = serde_json::from_value(value)?;
    world.session_id = session_id.to_string();
    Ok(world.sanitized())
}

/// Parse a stored memory document, skipping entries that cannot be repaired.
pub fn memory_from_value(value: Value, session_id: &str) -> Result<SessionMemory, StoreError> {
    check_version(&value, MEMORY_DOC_VERSION)?;

    let mut memory = SessionMemory::new(session_id);
    memory.revision = value.get("revision").and_then(Value::as_u64).unwrap_or(0);
    if let Some(updated_at) = value
        .get("updatedAt")
        .cloned()
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok())
    {
        memory.updated_at = updated_at;
    }

    let mut skipped = 0usize;
    if let Some(entities) = value.get("entities").and_then(Value::as_object) {
        for (raw_kind, entries) in entities {
            let Some(kind) = parse_entity_kind(raw_kind) else {
                skipped += entries.as_array().map_or(1, Vec::len);
                continue;
            };
            for raw in entries.as_array().map(Vec::as_slice).unwrap_or(&[]) {
                match parse_memory_entry(raw) {
                    Ok(entry) => memory.entities.entry(kind).or_default().push(entry),
                    Err(_) => skipped += 1,
                }
            }
        }
    }
    if skipped > 0 {
        warn!(session = session_id, skipped, "dropped malformed memory entries");
    }

    memory.history = value
        .get("history")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<MemoryHistoryRecord>>(v).ok())
        .unwrap_or_default();
    Ok(memory)
}

// =============================================================================
// JSON files
// =============================================================================

/// One directory per session holding `world.json` and `memory.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(safe_session_id(session_id))
    }

    async fn read_value(&self, session_id: &str, file: &str) -> Result<Option<Value>, StoreError> {
        let path = self.session_dir(session_id).join(file);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write through a temp file and rename, so readers never see half a document.
    async fn write_value<T: Serialize>(&self, session_id: &str, file: &str, doc: &T) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        let content = serde_json::to_string_pretty(doc)?;
        let path = dir.join(file);
        let tmp = dir.join(format!("{file}.tmp"));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "document saved");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load_world(&self, session_id: &str) -> Result<Option<WorldState>, StoreError> {
        match self.read_value(session_id, WORLD_FILE).await? {
            Some(value) => world_from_value(value, session_id).map(Some),
            None => Ok(None),
        }
    }

    async fn save_world(&self, world: &WorldState) -> Result<(), StoreError> {
        self.write_value(&world.session_id, WORLD_FILE, world).await
    }

    async fn load_memory(&self, session_id: &str) -> Result<Option<SessionMemory>, StoreError> {
        match self.read_value(session_id, MEMORY_FILE).await? {
            Some(value) => memory_from_value(value, session_id).map(Some),
            None => Ok(None),
        }
    }

    async fn save_memory(&self, memory: &SessionMemory) -> Result<(), StoreError> {
        self.write_value(&memory.session_id, MEMORY_FILE, memory).await
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut sessions = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join(WORLD_FILE).exists() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

// =============================================================================
// In memory
// =============================================================================

/// Volatile store for tests and hosts without a data directory. Documents
/// go through JSON so loading behaves like the file store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    worlds: AsyncMutex<HashMap<String, Value>>,
    memories: AsyncMutex<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn load_world(&self, session_id: &str) -> Result<Option<WorldState>, StoreError> {
        let value = self.worlds.lock().await.get(&safe_session_id(session_id)).cloned();
        value.map(|v| world_from_value(v, session_id)).transpose()
    }

    async fn save_world(&self, world: &WorldState) -> Result<(), StoreError> {
        let value = serde_json::to_value(world)?;
        self.worlds
            .lock()
            .await
            .insert(safe_session_id(&world.session_id), value);
        Ok(())
    }

    async fn load_memory(&self, session_id: &str) -> Result<Option<SessionMemory>, StoreError> {
        let value = self.memories.lock().await.get(&safe_session_id(session_id)).cloned();
        value.map(|v| memory_from_value(v, session_id)).transpose()
    }

    async fn save_memory(&self, memory: &SessionMemory) -> Result<(), StoreError> {
        let value = serde_json::to_value(memory)?;
        self.memories
            .lock()
            .await
            .insert(safe_session_id(&memory.session_id), value);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut sessions: Vec<String> = self.worlds.lock().await.keys().cloned().collect();
        sessions.sort();
        Ok(sessions)
    }
}

// =============================================================================
// Session locks
// =============================================================================

/// Serializes turns per session. Different sessions never wait on each other.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(safe_session_id(session_id)).or_default())
        };
        lock.lock_owned().await
    }
}
