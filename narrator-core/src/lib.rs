//! Turn orchestration engine for text role-play sessions.
//!
//! This crate provides:
//! - A persistent world (location, clock, reputation and tension, pending
//!   gates, active interlocutor) changed only through pure transitions
//! - Intent and commitment classification that decides whether a message
//!   may change the world at all
//! - A per-turn budget on calls to an external narrative oracle
//! - A tool bus over lore, rules and a decaying session memory
//! - A continuity guard that rejects narration drifting from the scene
//!
//! # Quick Start
//!
//! ```ignore
//! use narrator_core::{EngineConfig, TurnEngine, TurnRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env().with_start_location("Place du Marché");
//!     let engine = TurnEngine::from_config(config)?;
//!
//!     let response = engine
//!         .process_turn(TurnRequest::new("campaign-1", "Je vais au Port Est."))
//!         .await;
//!     println!("{}", response.reply);
//!     Ok(())
//! }
//! ```

extern crate self as narrator_core;

pub mod budget;
pub mod catalog;
pub mod config;
pub mod continuity;
pub mod diagnostics;
pub mod director;
pub mod error;
pub mod intent;
pub mod memory;
pub mod narration;
pub mod orchestrator;
pub mod persist;
pub mod profile;
pub mod sanitize;
pub mod testing;
pub mod text;
pub mod tools;
pub mod world;

// Re-export for convenience
pub use narrator_macros::Tool;

// Primary public API
pub use budget::{AiCallBudget, CallKind};
pub use config::{BudgetConfig, EngineConfig};
pub use diagnostics::{TurnDiagnostics, TurnOutcome};
pub use error::{EngineError, OracleError, StoreError, ToolError, ValidationError};
pub use intent::{Commitment, Intent, IntentType, RiskLevel};
pub use narration::{HttpNarrativeOracle, NarrativeDraft, NarrativeOracle, ResponseType};
pub use orchestrator::{
    ConversationMode, GateOutcome, TurnEngine, TurnEngineBuilder, TurnRequest, TurnResponse,
};
pub use persist::{DocumentStore, InMemoryStore, JsonFileStore};
pub use profile::CharacterProfile;
pub use testing::{ScriptedOracle, TestHarness};
pub use world::WorldState;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolArgs, ToolSpec};
    use serde::Deserialize;

    /// Record a debt owed to someone
    #[derive(Tool, Deserialize)]
    #[tool(name = "note_debt")]
    #[allow(dead_code)]
    struct NoteDebt {
        /// Who is owed
        creditor: String,
        /// What is owed
        amount: Option<u32>,
    }

    /// Look at the current scene
    #[derive(Tool, Deserialize)]
    #[tool(name = "look", read_only)]
    #[allow(dead_code)]
    struct Look {}

    #[test]
    fn test_tool_derive() {
        assert_eq!(NoteDebt::NAME, "note_debt");
        assert!(!NoteDebt::READ_ONLY);
        assert!(Look::READ_ONLY);
        assert_eq!(NoteDebt::description(), "Record a debt owed to someone");
    }

    #[test]
    fn test_tool_schema() {
        let schema = NoteDebt::input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["creditor"]["type"], "string");

        // creditor is required, amount is not (it's Option)
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "creditor"));
        assert!(!required.iter().any(|v| v == "amount"));
    }

    #[test]
    fn test_tool_spec() {
        let spec = ToolSpec::of::<Look>();
        assert_eq!(spec.name, "look");
        assert!(spec.read_only);
        assert!(!spec.description.is_empty());
    }
}
