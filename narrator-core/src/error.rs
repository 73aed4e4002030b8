//! Error types for the narrator engine.
//!
//! A turn never fails because the oracle or storage misbehaved: those
//! errors are logged and recorded in diagnostics while the turn falls back
//! to deterministic behavior. The variants here exist so each layer can say
//! precisely what went wrong before it is absorbed.

use thiserror::Error;

/// Errors from the narrative oracle layer.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle client error: {0}")]
    Client(#[from] oracle::Error),

    #[error("Oracle timed out")]
    Timeout,

    #[error("AI call budget exhausted for {label}")]
    BudgetExhausted { label: String },

    #[error("Oracle returned an invalid document: {0}")]
    InvalidResponse(String),

    #[error("No oracle configured")]
    Unavailable,
}

/// Errors from document persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Why a loosely-typed document could not be parsed into a canonical record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("unknown value `{value}` for `{field}`")]
    UnknownVariant { field: &'static str, value: String },

    #[error("field `{0}` is empty")]
    Empty(&'static str),
}

/// Errors raised by a tool invocation. They end up in the trace, never
/// as a failed turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// Errors surfaced to the host application.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
}
