//! Task orchestration core
//!
//! Couples a non-deterministic reasoning engine to a deterministic,
//! enforced safety envelope:
//!
//! - every proposed action resolves through the [`registry`] or fails closed
//! - the [`approval`] gate decides execute / prompt / deny per action
//! - workspace mutations are checkpointed and rolled back via `anvil-vcs`
//! - a done claim only stands after the [`validator`] sees a current
//!   passing test run
//! - the [`orchestrator`] loop bounds the whole thing to a fixed iteration
//!   budget and seals exactly one report per run
//!
//! Path and command enforcement live below this crate in `anvil-guard`;
//! tools here are glue over those boundaries, not boundaries themselves.

pub mod approval;
pub mod collab;
pub mod confidence;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod tools;
pub mod types;
pub mod validator;

pub use approval::{ApprovalGate, DEFAULT_CONFIDENCE_FLOOR};
pub use collab::{KnowledgeStore, LogMetrics, MetricsSink, NoopKnowledge, PastOutcome, RecallContext};
pub use confidence::{score_recall, ConfidenceScore};
pub use engine::{EngineError, EngineReply, Message, ReasoningEngine, Role, TaskContext, TokenUsage};
pub use error::CoreError;
pub use orchestrator::{
    ApprovalPrompt, Decision, LoopConfig, LoopState, Orchestrator, Turn,
};
pub use registry::{ActionKind, ActionSpec, Tool, ToolRegistry, ToolResult};
pub use tools::standard_registry;
pub use types::{
    ActionRequest, ApprovalDecision, ApprovalMode, Counters, Proposal, RiskClass, Run, RunId,
    RunOutcome, RunReport, RunStatus, TestOutcome,
};
pub use validator::{validate_done, DoneVerdict};
