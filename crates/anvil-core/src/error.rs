//! Error taxonomy for the orchestration core
//!
//! Local recovery is the default: per-action errors (denials, timeouts,
//! validation rejections) are folded back into the proposal context and the
//! run continues. Only checkpoint/rollback machinery failures are fatal.

use anvil_guard::GuardError;
use anvil_vcs::VcsError;

/// Main error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Jail breach or command denial from the guard boundaries.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Proposal named an action the registry does not know (fail closed).
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Two tools tried to claim the same action name.
    #[error("action already registered: {0}")]
    DuplicateAction(String),

    /// User or policy refused the action.
    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    /// Done claim rejected by the completion validator.
    #[error("done claim rejected: {0}")]
    ValidationRejected(String),

    /// Checkpoint machinery failed; the run must abort.
    #[error("checkpoint failure: {0}")]
    CheckpointFailure(String),

    /// Rollback failed; workspace trust state is unknown.
    #[error("rollback failure: {0} (workspace state must be inspected manually)")]
    RollbackFailure(String),

    /// Iteration budget exhausted without a successful completion.
    #[error("iteration budget exhausted ({0} iterations)")]
    BudgetExhausted(u32),

    /// Reasoning engine failed fatally.
    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// The loop was asked to continue from a terminal state.
    #[error("run already terminal: {0}")]
    AlreadyTerminal(String),

    /// No suspended approval to resume.
    #[error("no pending approval to resume")]
    NothingPending,
}

impl CoreError {
    /// Environment-level failures that must end the run.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CheckpointFailure(_) | Self::RollbackFailure(_) | Self::EngineFailure(_)
        )
    }
}

impl From<VcsError> for CoreError {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::RollbackFailed(msg) => Self::RollbackFailure(msg),
            other => Self::CheckpointFailure(other.to_string()),
        }
    }
}
