//! Built-in tools
//!
//! Every file-touching action resolves through the workspace jail; every
//! process-spawning action authorizes through the shell guard. Tools are
//! glue around those contracts, not safety boundaries themselves.

mod done;
mod fs;
mod shell;
mod test_runner;

pub use done::DoneTool;
pub use fs::{workspace_tree, FsTool};
pub use shell::ShellTool;
pub use test_runner::TestRunnerTool;

use std::path::Path;
use std::sync::Arc;

use anvil_guard::{ShellGuard, WorkspaceJail};

use crate::error::CoreError;
use crate::registry::ToolRegistry;

/// Standard registry wiring: fs, shell, test runner and the done marker,
/// all sharing one jail and one guard over the workspace.
pub fn standard_registry(
    workspace: &Path,
    guard: ShellGuard,
) -> Result<ToolRegistry, CoreError> {
    let jail = WorkspaceJail::new(workspace)?;
    let guard = Arc::new(guard);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FsTool::new(jail)))?;
    registry.register(Arc::new(ShellTool::new(Arc::clone(&guard))))?;
    registry.register(Arc::new(TestRunnerTool::new(
        guard,
        workspace.to_path_buf(),
    )))?;
    registry.register(Arc::new(DoneTool))?;
    Ok(registry)
}
