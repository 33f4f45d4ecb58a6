//! Guarded shell tool
//!
//! Wraps the shell guard as a registry action. Output is redacted and
//! capped before it reaches the engine context; a timeout is reported as
//! its own state, distinct from a failing exit code.

use std::sync::Arc;

use async_trait::async_trait;
use anvil_guard::{redact::redact, ExecStatus, ShellGuard};

use crate::registry::{ActionKind, ActionSpec, Tool, ToolResult};
use crate::types::RiskClass;

const STDOUT_CAP: usize = 5_000;
const STDERR_CAP: usize = 2_000;

/// The `run_command` action over one workspace's shell guard.
pub struct ShellTool {
    guard: Arc<ShellGuard>,
}

impl ShellTool {
    /// Tool over a configured guard.
    #[must_use]
    pub fn new(guard: Arc<ShellGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec {
            name: "run_command",
            description: "execute a shell command in the workspace",
            kind: ActionKind::Exec,
            risk: RiskClass::High,
        }]
    }

    async fn execute(&self, _action: &str, args: &serde_json::Value) -> ToolResult {
        let Some(cmd) = args["cmd"].as_str() else {
            return ToolResult::failure("run_command requires a 'cmd' argument");
        };

        match self.guard.run(cmd).await {
            Ok(result) => {
                let timed_out = result.status == ExecStatus::TimedOut;
                let exit_code = match result.status {
                    ExecStatus::Completed { exit_code } => exit_code,
                    ExecStatus::TimedOut => -1,
                };
                ToolResult {
                    ok: result.status.success(),
                    data: serde_json::json!({
                        "exit_code": exit_code,
                        "timed_out": timed_out,
                        "stdout": redact(cap(&result.stdout, STDOUT_CAP)),
                        "stderr": redact(cap(&result.stderr, STDERR_CAP)),
                        "duration_s": result.duration.as_secs_f64(),
                    }),
                    error: timed_out.then(|| "command timed out".to_string()),
                }
            }
            // Denials come back as a failed action; the run continues.
            Err(e) => {
                let denied = e.is_denial();
                let mut result = ToolResult::failure(e.to_string());
                result.data = serde_json::json!({ "denied": denied });
                result
            }
        }
    }
}

fn cap(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
