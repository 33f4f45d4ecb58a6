//! Error types for the guard boundaries

/// Errors raised by the jail and shell guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// A requested path resolves outside the workspace root.
    #[error("path escapes workspace: {requested:?} -> {resolved}")]
    PathViolation {
        /// The path as requested by the caller
        requested: String,
        /// Where it actually resolved (or would resolve)
        resolved: String,
    },

    /// A command matched a deny rule, or missed a non-empty allowlist.
    #[error("command denied by policy: {command:?} matched {pattern:?}")]
    CommandDenied {
        /// The offending command string (redacted)
        command: String,
        /// The rule that matched ("allowlist" when the command missed it)
        pattern: String,
    },

    /// The workspace root itself is unusable.
    #[error("workspace root unusable: {0}")]
    Root(String),

    /// Underlying I/O failure while resolving paths or spawning commands.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// True for policy denials (as opposed to environment failures).
    #[inline]
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PathViolation { .. } | Self::CommandDenied { .. }
        )
    }
}
