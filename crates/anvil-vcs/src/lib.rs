//! Checkpoint manager for anvil
//!
//! Transactional recoverability for a run: a pre-run snapshot, periodic
//! intermediate snapshots, a post-run snapshot on success, and an idempotent
//! rollback that restores the pre-run state exactly.
//!
//! Any backend offering atomic snapshot creation and atomic
//! restore-to-snapshot satisfies [`SnapshotBackend`]; [`GitBackend`] is the
//! standard implementation over the `git` CLI.

mod backend;
mod checkpoint;
mod error;

pub use backend::{GitBackend, SnapshotBackend};
pub use checkpoint::{CheckpointId, CheckpointLabel, CheckpointManager};
pub use error::VcsError;
