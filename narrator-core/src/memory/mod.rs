//! Session memory: places, people, facts, rumors and debts the session has
//! come across, with in-game-time decay.
//!
//! Entries fade unless the player keeps interacting with them. An entry is
//! gone once either its real-time or its in-game expiry has passed.

pub mod decay;
mod entry;
mod store;

pub use entry::{EntityKind, EntryData, EntryStatus, MemoryEntry, MemoryRow};
pub use store::{
    AppliedOp, DataPatch, DeleteOp, MemoryHistoryRecord, MemoryOp, ReadQuery, ReadScope,
    SessionMemory, UpsertOp, WriteReport, DEFAULT_READ_LIMIT, MAX_ENTRIES_PER_KIND,
    MAX_MEMORY_HISTORY, MAX_READ_LIMIT, MEMORY_DOC_VERSION,
};

/// Interaction weight of an interlocutor observation.
pub const NPC_OBSERVATION_WEIGHT: f64 = 0.35;

/// Interaction weight of an arrival observation.
pub const PLACE_OBSERVATION_WEIGHT: f64 = 0.25;

/// Interaction weight of a consequence observation.
pub const FACT_OBSERVATION_WEIGHT: f64 = 0.1;
