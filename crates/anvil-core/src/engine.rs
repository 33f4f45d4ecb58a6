//! Reasoning engine contract and proposal parsing
//!
//! The engine is a black box returning text per turn. The loop owns the
//! conversation context, parses structured proposals out of the text, and
//! classifies engine failures as transient (retry with backoff) or fatal
//! (abort the run).

use async_trait::async_trait;

use crate::registry::{ActionKind, ToolRegistry};
use crate::types::{ActionRequest, Proposal};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System framing
    System,
    /// Task, results, and rejection feedback
    User,
    /// Engine output
    Assistant,
}

/// One conversation message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    /// Speaker
    pub role: Role,
    /// Content
    pub content: String,
}

/// Accumulated context handed to the engine each planning turn.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Ordered conversation
    pub messages: Vec<Message>,
}

impl TaskContext {
    /// Append a message.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
    }
}

/// Token usage reported for one engine turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Prompt-side tokens
    pub prompt: u64,
    /// Completion-side tokens
    pub completion: u64,
}

/// One engine turn: raw text plus usage.
#[derive(Debug, Clone)]
pub struct EngineReply {
    /// Raw assistant text
    pub content: String,
    /// Token usage, zero when the backend does not report it
    pub usage: TokenUsage,
}

/// Engine failure classification.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Worth retrying with backoff (rate limit, connection reset).
    #[error("transient engine error: {0}")]
    Transient(String),
    /// Not recoverable; the run must abort.
    #[error("fatal engine error: {0}")]
    Fatal(String),
}

/// External reasoning source. Non-deterministic and untrusted; everything
/// it proposes goes through the approval gate and the registry.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Produce the next turn for the given context.
    async fn propose(&self, ctx: &TaskContext) -> Result<EngineReply, EngineError>;
}

/// Extract a proposal from engine text.
///
/// Accepts a JSON array of `{"tool": ..., "args": {...}}` calls, possibly
/// embedded in surrounding prose. Text with no parseable call array becomes
/// a done claim carrying the text as summary: the completion validator
/// still gates it.
#[must_use]
pub fn parse_proposal(text: &str) -> Proposal {
    let trimmed = text.trim();

    let candidate = if trimmed.starts_with('[') {
        Some(trimmed.to_string())
    } else {
        match (trimmed.find('['), trimmed.rfind(']')) {
            (Some(start), Some(end)) if end > start => Some(trimmed[start..=end].to_string()),
            _ => None,
        }
    };

    if let Some(json) = candidate {
        match serde_json::from_str::<Vec<ActionRequest>>(&json) {
            Ok(actions) if !actions.is_empty() => return Proposal { actions },
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "engine text not a tool-call array"),
        }
    }

    Proposal {
        actions: vec![ActionRequest {
            name: "done".to_string(),
            args: serde_json::json!({ "summary": trimmed }),
        }],
    }
}

/// System prompt listing the registered actions and the operating rules.
#[must_use]
pub fn system_prompt(registry: &ToolRegistry) -> String {
    let mut prompt = String::from(
        "You are an expert coding agent operating on a workspace directory.\n\
         You have these tools:\n\n",
    );
    for (i, spec) in registry.catalog().iter().enumerate() {
        prompt.push_str(&format!("{}. {}: {}\n", i + 1, spec.name, spec.description));
    }
    prompt.push_str(
        "\nRULES:\n\
         - Prefer replace_in_file for edits to existing files; write_file for new files.\n\
         - After code changes, run tests to verify. If tests fail, fix and retry.\n\
         - A done claim is only accepted after a passing test run.\n\
         - Be concise. Never leak secrets or environment variables.\n\n\
         Respond with a JSON array of tool calls:\n\
         [{\"tool\": \"tool_name\", \"args\": {\"key\": \"value\"}}]\n\n\
         Only respond with the JSON array, no other text.\n",
    );
    prompt
}

/// Whether an action kind depends on earlier actions' side effects. Read
/// actions are independent and may dispatch concurrently; everything else
/// serializes.
#[must_use]
pub fn is_independent(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Read)
}
