//! Per-run checkpoint bookkeeping
//!
//! A run owns an ordered checkpoint sequence: `pre`, zero or more
//! `intermediate-N` snapshots (one every K file-modifying actions, counted
//! by the orchestrator), and `post` on success. Rollback restores `pre`
//! exactly and discards the run's other labels; it is idempotent.

use crate::backend::SnapshotBackend;
use crate::error::VcsError;

/// Opaque handle to one snapshot (the backend's tag/label).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointId(pub String);

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a checkpoint within its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLabel {
    /// Taken before any action executes.
    Pre,
    /// Taken every K file-modifying actions.
    Intermediate(u32),
    /// Taken after the done claim is accepted.
    Post,
}

impl CheckpointLabel {
    fn render(self, run_key: &str) -> String {
        match self {
            Self::Pre => format!("anvil-{run_key}-pre"),
            Self::Intermediate(n) => format!("anvil-{run_key}-intermediate-{n}"),
            Self::Post => format!("anvil-{run_key}-post"),
        }
    }
}

/// Checkpoint lifecycle for a single run.
///
/// Invariant: snapshots are only taken from a fully-committed working state;
/// the backend commits the whole tree as part of each snapshot, so the
/// invariant holds by construction as long as nothing else mutates the
/// workspace concurrently (the orchestrator's workspace lock guarantees it).
pub struct CheckpointManager<B> {
    backend: B,
    run_key: String,
    pre: Option<CheckpointId>,
    intermediates: Vec<CheckpointId>,
    post: Option<CheckpointId>,
    next_ordinal: u32,
    rolled_back: bool,
}

impl<B: SnapshotBackend> CheckpointManager<B> {
    /// Manager for the run identified by `run_key` (short, label-safe).
    pub fn new(backend: B, run_key: impl Into<String>) -> Self {
        Self {
            backend,
            run_key: run_key.into(),
            pre: None,
            intermediates: Vec::new(),
            post: None,
            next_ordinal: 1,
            rolled_back: false,
        }
    }

    /// Prepare the backend and take the pre-run checkpoint.
    pub async fn begin(&mut self) -> Result<CheckpointId, VcsError> {
        self.backend.ensure_ready().await?;
        let id = self
            .backend
            .snapshot(&CheckpointLabel::Pre.render(&self.run_key))
            .await?;
        self.pre = Some(id.clone());
        Ok(id)
    }

    /// Take a continuous-save checkpoint (bounds rollback-induced loss).
    pub async fn intermediate(&mut self) -> Result<CheckpointId, VcsError> {
        let label = CheckpointLabel::Intermediate(self.next_ordinal).render(&self.run_key);
        let id = self.backend.snapshot(&label).await?;
        self.next_ordinal += 1;
        self.intermediates.push(id.clone());
        Ok(id)
    }

    /// Take the post-run checkpoint (success path only).
    pub async fn commit(&mut self) -> Result<CheckpointId, VcsError> {
        let id = self
            .backend
            .snapshot(&CheckpointLabel::Post.render(&self.run_key))
            .await?;
        self.post = Some(id.clone());
        Ok(id)
    }

    /// Restore the pre-run checkpoint, discarding everything the run did.
    ///
    /// Idempotent: a second call (or a call before `begin`) is a no-op.
    /// A restore failure surfaces as [`VcsError::RollbackFailed`] and is
    /// never swallowed.
    pub async fn rollback(&mut self) -> Result<bool, VcsError> {
        if self.rolled_back {
            tracing::debug!(run = %self.run_key, "rollback already performed; no-op");
            return Ok(false);
        }
        let Some(pre) = self.pre.clone() else {
            tracing::debug!(run = %self.run_key, "no pre-run checkpoint; nothing to roll back");
            return Ok(false);
        };

        self.backend.restore(&pre).await?;
        self.rolled_back = true;

        // The failed run's other labels are meaningless after restore.
        for id in self.intermediates.drain(..) {
            let _ = self.backend.discard(&id).await;
        }
        if let Some(post) = self.post.take() {
            let _ = self.backend.discard(&post).await;
        }
        tracing::warn!(run = %self.run_key, checkpoint = %pre, "workspace rolled back");
        Ok(true)
    }

    /// Most recent checkpoint taken for this run.
    #[must_use]
    pub fn latest(&self) -> Option<&CheckpointId> {
        self.post
            .as_ref()
            .or_else(|| self.intermediates.last())
            .or(self.pre.as_ref())
    }

    /// The pre-run checkpoint, once `begin` has run.
    #[must_use]
    pub fn pre(&self) -> Option<&CheckpointId> {
        self.pre.as_ref()
    }

    /// Whether rollback has been performed.
    #[must_use]
    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }
}
