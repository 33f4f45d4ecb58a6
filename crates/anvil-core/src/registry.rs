//! Tool registry
//!
//! Maps symbolic action names to handlers. A handler is composition, not
//! inheritance: a function behind the [`Tool`] trait plus a declared kind
//! and risk class per action. Unknown names fail closed; dispatch returns
//! an error, never a silent skip.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::{ActionRequest, RiskClass};

/// What an action does to the workspace; drives serialization and the
/// completion validator's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Read-only observation; may dispatch concurrently with other reads.
    Read,
    /// File-modifying; serialized, counts toward checkpoint interval.
    Write,
    /// Process execution; serialized.
    Exec,
    /// Test execution; serialized, updates the test outcome record.
    Test,
    /// Done claim; intercepted by the loop, routed to the validator.
    Done,
}

/// Declared surface of one registered action.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// Action name as proposals reference it
    pub name: &'static str,
    /// One-line description for the engine prompt
    pub description: &'static str,
    /// Workspace effect class
    pub kind: ActionKind,
    /// Risk class the approval gate sees
    pub risk: RiskClass,
}

/// Uniform result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the action succeeded
    pub ok: bool,
    /// Action-specific payload
    pub data: serde_json::Value,
    /// Error description when `ok` is false
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result with a payload.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    /// Failed result with a reason.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Flatten into the JSON fed back to the engine.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({ "ok": self.ok });
        if let serde_json::Value::Object(data) = &self.data {
            for (k, v) in data {
                obj[k.as_str()] = v.clone();
            }
        }
        if let Some(err) = &self.error {
            obj["error"] = serde_json::Value::String(err.clone());
        }
        obj
    }
}

/// A tool: a named bundle of actions sharing state (jail handle, guard).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Short unique tool name.
    fn name(&self) -> &'static str;

    /// Actions this tool serves.
    fn actions(&self) -> Vec<ActionSpec>;

    /// Execute one of this tool's actions.
    async fn execute(&self, action: &str, args: &serde_json::Value) -> ToolResult;
}

struct Registered {
    spec: ActionSpec,
    tool: Arc<dyn Tool>,
}

/// Action-name to handler map with per-action kind/risk tags.
#[derive(Default)]
pub struct ToolRegistry {
    actions: HashMap<&'static str, Registered>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every action a tool declares. Duplicate names are a
    /// programming error and fail registration.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), CoreError> {
        for spec in tool.actions() {
            if self.actions.contains_key(spec.name) {
                return Err(CoreError::DuplicateAction(spec.name.to_string()));
            }
            tracing::debug!(tool = tool.name(), action = spec.name, "action registered");
            self.actions.insert(
                spec.name,
                Registered {
                    spec,
                    tool: Arc::clone(&tool),
                },
            );
        }
        Ok(())
    }

    /// Declared spec for an action name, if registered.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name).map(|r| &r.spec)
    }

    /// Dispatch a request to its handler. Unknown names fail closed.
    pub async fn dispatch(&self, request: &ActionRequest) -> Result<ToolResult, CoreError> {
        let Some(registered) = self.actions.get(request.name.as_str()) else {
            tracing::warn!(action = %request.name, "unknown action requested");
            return Err(CoreError::UnknownAction(request.name.clone()));
        };
        Ok(registered
            .tool
            .execute(registered.spec.name, &request.args)
            .await)
    }

    /// All registered specs, sorted by name (stable prompt assembly).
    #[must_use]
    pub fn catalog(&self) -> Vec<&ActionSpec> {
        let mut specs: Vec<_> = self.actions.values().map(|r| &r.spec).collect();
        specs.sort_by_key(|s| s.name);
        specs
    }
}
