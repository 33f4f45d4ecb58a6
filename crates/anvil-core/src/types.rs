//! Core data model
//!
//! - run identity, approval modes and risk classes
//! - proposals and action requests (transient, one iteration)
//! - the per-run test outcome record the completion validator reads
//! - the sealed run report handed to the metrics collaborator

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new run id.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short label-safe form (first uuid segment), used in checkpoint tags.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much unattended execution the run permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Execute everything without confirmation.
    Auto,
    /// Confirm high-risk work once, at the plan stage.
    Ask,
    /// Confirm every action individually.
    Paranoid,
}

impl std::str::FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ask" => Ok(Self::Ask),
            "paranoid" => Ok(Self::Paranoid),
            other => Err(format!("unknown approval mode: {other:?}")),
        }
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Ask => "ask",
            Self::Paranoid => "paranoid",
        };
        write!(f, "{s}")
    }
}

/// Risk class of a registered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskClass {
    /// Read-only observation of the workspace.
    Low,
    /// Writes, process execution, or version-control mutation.
    High,
}

/// Per-action outcome of the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Execute immediately.
    Execute,
    /// Suspend the loop and wait for an external approve/deny.
    Prompt,
    /// Refuse this action (the run continues).
    Deny,
}

/// One named action plus arguments, produced from a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Registry action name
    #[serde(rename = "tool")]
    pub name: String,
    /// Argument mapping, schema owned by the handler
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One reasoning-engine output for a single iteration.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    /// Requested actions, in proposal order
    pub actions: Vec<ActionRequest>,
}

/// Last-known result of a test-execution action. Exactly one current record
/// exists per run; each new test run replaces it atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Whether the suite passed
    pub passed: bool,
    /// Human-readable summary (framework, counts)
    pub summary: String,
    /// When the record was taken
    pub recorded_at: DateTime<Utc>,
}

/// Cumulative per-run counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Actions dispatched (including denied/failed ones)
    pub actions: u64,
    /// File-modifying actions that succeeded
    pub files_changed: u64,
    /// Prompt tokens consumed by the engine
    pub prompt_tokens: u64,
    /// Completion tokens consumed by the engine
    pub completion_tokens: u64,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Still executing.
    Pending,
    /// Done claim accepted.
    Succeeded,
    /// Sealed as failed (rolled back or aborted).
    Failed,
}

/// Exit surface exposed upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Completion validator accepted; post checkpoint exists.
    Succeeded,
    /// Budget/fatal-error path; workspace restored to pre-run state.
    FailedRolledBack,
    /// Explicit abort or unrecoverable environment failure.
    Aborted,
}

/// One task execution, owned exclusively by the orchestrator loop.
#[derive(Debug, Clone)]
pub struct Run {
    /// Unique id
    pub id: RunId,
    /// Task description given by the caller
    pub task: String,
    /// Workspace root
    pub workspace: PathBuf,
    /// Configured approval mode
    pub mode: ApprovalMode,
    /// Iterations consumed
    pub iterations: u32,
    /// Cumulative counters
    pub counters: Counters,
    /// Terminal status
    pub status: RunStatus,
    /// Reason for non-success, set at sealing
    pub failure_reason: Option<String>,
    test_outcome: Option<TestOutcome>,
    edits_since_test: u32,
}

impl Run {
    /// New pending run.
    #[must_use]
    pub fn new(task: impl Into<String>, workspace: PathBuf, mode: ApprovalMode) -> Self {
        Self {
            id: RunId::new(),
            task: task.into(),
            workspace,
            mode,
            iterations: 0,
            counters: Counters::default(),
            status: RunStatus::Pending,
            failure_reason: None,
            test_outcome: None,
            edits_since_test: 0,
        }
    }

    /// Replace the current test outcome record atomically.
    pub fn record_test_outcome(&mut self, passed: bool, summary: impl Into<String>) {
        self.test_outcome = Some(TestOutcome {
            passed,
            summary: summary.into(),
            recorded_at: Utc::now(),
        });
        self.edits_since_test = 0;
    }

    /// Note a successful file-modifying action; supersedes the test record's
    /// freshness.
    pub fn note_file_modified(&mut self) {
        self.counters.files_changed += 1;
        self.edits_since_test += 1;
    }

    /// The current test outcome record, if any.
    #[must_use]
    pub fn test_outcome(&self) -> Option<&TestOutcome> {
        self.test_outcome.as_ref()
    }

    /// File edits made after the last recorded test run.
    #[must_use]
    pub fn edits_since_test(&self) -> u32 {
        self.edits_since_test
    }

    /// Seal the run with a terminal status.
    pub fn seal(&mut self, status: RunStatus, reason: Option<String>) {
        debug_assert_eq!(self.status, RunStatus::Pending, "run sealed twice");
        self.status = status;
        self.failure_reason = reason;
    }
}

/// Finalized run record, delivered once to the metrics collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run id
    pub run_id: RunId,
    /// Task description
    pub task: String,
    /// Terminal outcome
    pub outcome: RunOutcome,
    /// Structured reason for non-success outcomes
    pub reason: Option<String>,
    /// Iterations consumed
    pub iterations: u32,
    /// Cumulative counters
    pub counters: Counters,
    /// Whether rollback executed
    pub rollback_used: bool,
    /// Whether the low-confidence override tightened the approval mode
    pub spiked: bool,
    /// Wall-clock duration
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RunReport {
    /// Convenience success flag.
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
