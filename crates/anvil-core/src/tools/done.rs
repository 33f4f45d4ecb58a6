//! Done marker
//!
//! Registered so the action name exists in the catalog and the engine
//! prompt; the orchestrator intercepts `done` before dispatch and routes
//! the claim through the completion validator. Executing it directly just
//! echoes the summary.

use async_trait::async_trait;

use crate::registry::{ActionKind, ActionSpec, Tool, ToolResult};
use crate::types::RiskClass;

/// The `done` action.
pub struct DoneTool;

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &'static str {
        "done"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec {
            name: "done",
            description: "signal task completion with a summary",
            kind: ActionKind::Done,
            risk: RiskClass::Low,
        }]
    }

    async fn execute(&self, _action: &str, args: &serde_json::Value) -> ToolResult {
        ToolResult::success(serde_json::json!({
            "done": true,
            "summary": args["summary"].as_str().unwrap_or(""),
        }))
    }
}
