//! Error types for snapshot backends and the checkpoint manager

/// Errors from checkpoint/rollback machinery. Both variants are run-fatal
/// for the orchestrator; [`VcsError::RollbackFailed`] additionally means the
/// workspace trust state is unknown and must be flagged for inspection.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Snapshot creation failed; the environment is not usable.
    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),

    /// Restore failed; workspace state is now undefined.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// The backend tool itself misbehaved (spawn failure, bad output).
    #[error("vcs backend error: {0}")]
    Backend(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
