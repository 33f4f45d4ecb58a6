//! Test runner tool
//!
//! Detects the project's test framework from marker files, runs the suite
//! through the shell guard, and reports a structured pass/fail summary.
//! The orchestrator turns that summary into the run's test outcome record.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use anvil_guard::{ExecStatus, ShellGuard};

use crate::registry::{ActionKind, ActionSpec, Tool, ToolResult};
use crate::types::RiskClass;

/// (framework, marker files, command)
const DETECTORS: &[(&str, &[&str], &str)] = &[
    ("cargo", &["Cargo.toml"], "cargo test"),
    ("go", &["go.mod"], "go test ./..."),
    (
        "pytest",
        &["conftest.py", "pytest.ini", "pyproject.toml"],
        "python -m pytest --tb=short -q",
    ),
    (
        "jest",
        &["jest.config.js", "jest.config.ts", "jest.config.mjs"],
        "npx jest --no-coverage",
    ),
];

/// Framework detection plus guarded test execution.
pub struct TestRunnerTool {
    guard: Arc<ShellGuard>,
    workspace: PathBuf,
}

impl TestRunnerTool {
    /// Runner for one workspace.
    #[must_use]
    pub fn new(guard: Arc<ShellGuard>, workspace: PathBuf) -> Self {
        Self { guard, workspace }
    }

    /// Detect `(framework, command)` from marker files.
    #[must_use]
    pub fn detect(&self) -> Option<(&'static str, &'static str)> {
        for (framework, markers, cmd) in DETECTORS {
            for marker in *markers {
                let path = self.workspace.join(marker);
                if !path.exists() {
                    continue;
                }
                // pyproject.toml alone does not imply pytest.
                if *framework == "pytest" && *marker == "pyproject.toml" {
                    let text = std::fs::read_to_string(&path).unwrap_or_default();
                    if !text.contains("pytest") {
                        continue;
                    }
                }
                return Some((framework, cmd));
            }
        }
        if self.workspace.join("tests").is_dir() {
            return Some(("pytest", "python -m pytest --tb=short -q"));
        }
        None
    }
}

#[async_trait]
impl Tool for TestRunnerTool {
    fn name(&self) -> &'static str {
        "test_runner"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec {
            name: "run_tests",
            description: "run the project test suite (auto-detects framework)",
            kind: ActionKind::Test,
            risk: RiskClass::High,
        }]
    }

    async fn execute(&self, _action: &str, args: &serde_json::Value) -> ToolResult {
        let (framework, default_cmd) = match self.detect() {
            Some(d) => d,
            None => return ToolResult::failure("no test framework detected"),
        };
        let cmd = args["command"].as_str().unwrap_or(default_cmd);

        let result = match self.guard.run(cmd).await {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        if result.status == ExecStatus::TimedOut {
            return ToolResult {
                ok: false,
                data: serde_json::json!({
                    "framework": framework,
                    "passed": false,
                    "timed_out": true,
                    "summary": "test run timed out",
                }),
                error: Some("test run timed out".to_string()),
            };
        }

        let passed = result.status.success();
        let combined = format!("{}\n{}", result.stdout, result.stderr);
        let summary = summarize(framework, passed, &combined);
        ToolResult {
            ok: passed,
            data: serde_json::json!({
                "framework": framework,
                "passed": passed,
                "summary": summary,
                "output": truncate(&combined, 5_000),
            }),
            error: (!passed).then(|| summary.clone()),
        }
    }
}

/// Pull a one-line result summary out of runner output; fall back to the
/// exit status when the output shape is unrecognized.
fn summarize(framework: &str, passed: bool, output: &str) -> String {
    let line = match framework {
        "cargo" => output
            .lines()
            .rev()
            .find(|l| l.contains("test result:"))
            .map(str::trim),
        "pytest" => output
            .lines()
            .rev()
            .find(|l| l.contains("passed") || l.contains("failed") || l.contains("error"))
            .map(str::trim),
        "go" => output
            .lines()
            .rev()
            .find(|l| l.starts_with("ok") || l.starts_with("FAIL"))
            .map(str::trim),
        "jest" => output.lines().find(|l| l.contains("Tests:")).map(str::trim),
        _ => None,
    };
    match line {
        Some(l) => format!("{framework}: {l}"),
        None if passed => format!("{framework}: suite passed"),
        None => format!("{framework}: suite failed"),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n… [truncated]", &text[..end])
}
