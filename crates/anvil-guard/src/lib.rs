//! Safety primitives for anvil
//!
//! Two enforcement boundaries every workspace side effect must cross:
//! - [`WorkspaceJail`]: path confinement for all file operations
//! - [`ShellGuard`]: command authorization and bounded execution
//!
//! Plus [`redact`], the secret-scrubbing pass applied to anything that is
//! logged or fed back into an engine context.

mod error;
mod jail;
pub mod redact;
mod shell;

pub use error::GuardError;
pub use jail::WorkspaceJail;
pub use shell::{ExecResult, ExecStatus, ShellGuard, DEFAULT_DENYLIST, DEFAULT_TIMEOUT_SECS};
