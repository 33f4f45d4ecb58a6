//! Snapshot backends
//!
//! [`GitBackend`] shells out to the `git` CLI: a snapshot is a commit of the
//! full working tree plus a tag, a restore is `reset --hard` to that tag
//! followed by `clean -fd` so files created after the snapshot disappear.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::checkpoint::CheckpointId;
use crate::error::VcsError;

/// Contract the checkpoint manager needs from a version-control backend:
/// atomic snapshot creation and atomic restore-to-snapshot.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Make the workspace snapshot-ready (e.g. init a repository if absent).
    async fn ensure_ready(&self) -> Result<(), VcsError>;

    /// Record all current file state under `label`, atomically.
    async fn snapshot(&self, label: &str) -> Result<CheckpointId, VcsError>;

    /// Restore tracked state exactly as recorded in `id`, discarding
    /// everything newer.
    async fn restore(&self, id: &CheckpointId) -> Result<(), VcsError>;

    /// True when the working tree differs from the last recorded state.
    async fn is_dirty(&self) -> Result<bool, VcsError>;

    /// Drop a snapshot label (used when a failed run's tags are discarded).
    async fn discard(&self, id: &CheckpointId) -> Result<(), VcsError>;
}

/// Git CLI snapshot backend scoped to one workspace directory.
#[derive(Debug, Clone)]
pub struct GitBackend {
    workspace: PathBuf,
}

impl GitBackend {
    /// Backend over `workspace`. Does not touch the directory until
    /// [`SnapshotBackend::ensure_ready`] runs.
    #[must_use]
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, VcsError> {
        tracing::debug!(args = ?args, "git");
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.workspace)
            // Commit identity must not depend on host configuration.
            .args(["-c", "user.name=anvil", "-c", "user.email=anvil@localhost"])
            .args(args)
            .output()
            .await?;
        Ok(output)
    }

    async fn git_ok(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(VcsError::Backend(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn is_repo(&self) -> Result<bool, VcsError> {
        let output = self.git(&["rev-parse", "--is-inside-work-tree"]).await?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl SnapshotBackend for GitBackend {
    async fn ensure_ready(&self) -> Result<(), VcsError> {
        if self.is_repo().await? {
            return Ok(());
        }
        self.git_ok(&["init"]).await?;
        self.git_ok(&["add", "-A"]).await?;
        self.git_ok(&["commit", "--allow-empty", "-m", "anvil: initial state"])
            .await?;
        tracing::info!(workspace = %self.workspace.display(), "initialized git repository");
        Ok(())
    }

    async fn snapshot(&self, label: &str) -> Result<CheckpointId, VcsError> {
        let dirty = self.is_dirty().await?;
        let result = async {
            if dirty {
                self.git_ok(&["add", "-A"]).await?;
                self.git_ok(&["commit", "-m", label]).await?;
            } else {
                // Empty commit so the tag marks this exact point in time.
                self.git_ok(&["commit", "--allow-empty", "-m", label]).await?;
            }
            self.git_ok(&["tag", label]).await
        }
        .await;

        match result {
            Ok(_) => {
                tracing::info!(label, "checkpoint created");
                Ok(CheckpointId(label.to_string()))
            }
            Err(e) => Err(VcsError::CheckpointFailed(e.to_string())),
        }
    }

    async fn restore(&self, id: &CheckpointId) -> Result<(), VcsError> {
        let result = async {
            self.git_ok(&["reset", "--hard", &id.0]).await?;
            // reset --hard leaves files created since the snapshot untracked.
            self.git_ok(&["clean", "-fd"]).await
        }
        .await;

        match result {
            Ok(_) => {
                tracing::info!(checkpoint = %id.0, "workspace restored");
                Ok(())
            }
            Err(e) => Err(VcsError::RollbackFailed(e.to_string())),
        }
    }

    async fn is_dirty(&self) -> Result<bool, VcsError> {
        let out = self.git_ok(&["status", "--porcelain"]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn discard(&self, id: &CheckpointId) -> Result<(), VcsError> {
        // Best-effort; a stale tag is clutter, not a safety problem.
        let _ = self.git(&["tag", "-d", &id.0]).await?;
        Ok(())
    }
}
