//! The tool bus.
//!
//! Named, typed operations against the world snapshot and session memory.
//! Every read or write a narration needs goes through here, and every call
//! lands in the trace.

mod builtin;

pub use builtin::{
    GetWorldState, QueryLore, QueryPlayerSheet, QueryRules, QuestTramaTick, SessionDbRead,
    SessionDbWrite, UNREST_TENSION_THRESHOLD,
};

use crate::catalog::{LoreLookup, RulesLookup};
use crate::error::ToolError;
use crate::memory::SessionMemory;
use crate::profile::CharacterProfile;
use crate::world::WorldState;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Implemented by `#[derive(Tool)]` on argument structs.
pub trait ToolArgs {
    const NAME: &'static str;
    const READ_ONLY: bool;

    fn description() -> &'static str;

    fn input_schema() -> Value;
}

/// Catalog entry exported to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub read_only: bool,
}

impl ToolSpec {
    pub fn of<A: ToolArgs>() -> Self {
        Self {
            name: A::NAME.to_string(),
            description: A::description().to_string(),
            input_schema: A::input_schema(),
            read_only: A::READ_ONLY,
        }
    }
}

/// Who asked for a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    /// Deterministic calls planned by the engine.
    Policy,
    #[default]
    Oracle,
}

/// A requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub origin: CallOrigin,
}

impl ToolCall {
    pub fn policy(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            origin: CallOrigin::Policy,
        }
    }

    pub fn oracle(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            origin: CallOrigin::Oracle,
        }
    }

    /// `(name, JSON(args))` with sorted keys. `null` and `{}` are the same.
    pub fn dedup_key(&self) -> String {
        let args = match &self.args {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        format!("{}:{}", self.name, args)
    }
}

/// One executed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTraceEntry {
    pub tool: String,
    pub args: Value,
    pub origin: CallOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolTraceEntry {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Output of [`ToolBus::execute_tool_calls`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRun {
    pub trace: Vec<ToolTraceEntry>,
    /// Calls dropped as duplicates of an earlier one.
    pub deduplicated: usize,
    /// Whether any call wrote to session memory.
    pub wrote_memory: bool,
}

/// Everything a tool may see. Memory is the only writable part.
pub struct ToolContext<'a> {
    pub world: &'a WorldState,
    pub memory: &'a mut SessionMemory,
    pub lore: &'a dyn LoreLookup,
    pub rules: &'a dyn RulesLookup,
    pub profile: Option<&'a CharacterProfile>,
    pub now: DateTime<Utc>,
}

/// An executable tool.
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError>;
}

type Handler<A> = fn(A, &mut ToolContext<'_>) -> Result<Value, ToolError>;

/// A tool made of a typed argument struct and a handler.
pub struct TypedTool<A> {
    handler: Handler<A>,
    _args: PhantomData<fn() -> A>,
}

impl<A> TypedTool<A> {
    pub fn new(handler: Handler<A>) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

impl<A: ToolArgs + DeserializeOwned> Tool for TypedTool<A> {
    fn spec(&self) -> ToolSpec {
        ToolSpec::of::<A>()
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let args = match args {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        let parsed: A = serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs {
            tool: A::NAME.to_string(),
            reason: e.to_string(),
        })?;
        (self.handler)(parsed, ctx)
    }
}

/// Named tools available to the bus.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed set of engine tools.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        self.tools.insert(tool.spec().name, Box::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog for the oracle, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

/// Dispatches tool calls against a [`ToolContext`].
#[derive(Debug)]
pub struct ToolBus {
    registry: ToolRegistry,
}

impl Default for ToolBus {
    fn default() -> Self {
        Self::new(ToolRegistry::standard())
    }
}

impl ToolBus {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute `calls` in order, skipping duplicates.
    ///
    /// Unknown tools and failing tools produce a trace entry with `error`
    /// set; they never abort the run.
    pub fn execute_tool_calls(&self, calls: &[ToolCall], ctx: &mut ToolContext<'_>) -> ToolRun {
        let mut run = ToolRun::default();
        let mut seen = HashSet::new();

        for call in calls {
            if !seen.insert(call.dedup_key()) {
                run.deduplicated += 1;
                debug!(tool = %call.name, "duplicate tool call skipped");
                continue;
            }

            let outcome = match self.registry.get(&call.name) {
                Some(tool) => {
                    let writes = !tool.spec().read_only;
                    let result = tool.execute(&call.args, ctx);
                    if writes && result.is_ok() {
                        run.wrote_memory = true;
                    }
                    result
                }
                None => Err(ToolError::UnknownTool(call.name.clone())),
            };

            let entry = match outcome {
                Ok(result) => ToolTraceEntry {
                    tool: call.name.clone(),
                    args: call.args.clone(),
                    origin: call.origin,
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    ToolTraceEntry {
                        tool: call.name.clone(),
                        args: call.args.clone(),
                        origin: call.origin,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            run.trace.push(entry);
        }

        run
    }
}
