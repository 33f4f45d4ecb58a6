//! Jailed filesystem tool
//!
//! read/list/search are read-class; write/replace are file-modifying and
//! high risk. All paths resolve through the jail; there is no alternate
//! route to storage.

use std::path::Path;

use async_trait::async_trait;
use anvil_guard::WorkspaceJail;

use crate::registry::{ActionKind, ActionSpec, Tool, ToolResult};
use crate::types::RiskClass;

/// Max chars of a file read fed back into engine context.
const READ_CAP: usize = 8_000;
/// Max search matches returned.
const SEARCH_CAP: usize = 50;
/// Max entries in a listed tree.
const TREE_CAP: usize = 200;

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
];

/// Filesystem actions over one jailed workspace.
pub struct FsTool {
    jail: WorkspaceJail,
}

impl FsTool {
    /// Tool over an already-validated jail.
    #[must_use]
    pub fn new(jail: WorkspaceJail) -> Self {
        Self { jail }
    }

    fn read_file(&self, args: &serde_json::Value) -> ToolResult {
        let Some(path) = args["path"].as_str() else {
            return ToolResult::failure("read_file requires a 'path' argument");
        };
        let target = match self.jail.resolve(path) {
            Ok(t) => t,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        match std::fs::read_to_string(&target) {
            Ok(mut content) => {
                let truncated = content.len() > READ_CAP;
                if truncated {
                    let mut end = READ_CAP;
                    while !content.is_char_boundary(end) {
                        end -= 1;
                    }
                    content.truncate(end);
                    content.push_str("\n… [truncated]");
                }
                ToolResult::success(serde_json::json!({
                    "content": content,
                    "truncated": truncated,
                }))
            }
            Err(e) => ToolResult::failure(format!("read {path}: {e}")),
        }
    }

    fn write_file(&self, args: &serde_json::Value) -> ToolResult {
        let (Some(path), Some(content)) = (args["path"].as_str(), args["content"].as_str())
        else {
            return ToolResult::failure("write_file requires 'path' and 'content'");
        };
        let target = match self.jail.resolve(path) {
            Ok(t) => t,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::failure(format!("mkdir for {path}: {e}"));
            }
        }
        match std::fs::write(&target, content) {
            Ok(()) => {
                tracing::info!(path, bytes = content.len(), "file written");
                ToolResult::success(serde_json::json!({
                    "wrote": path,
                    "bytes": content.len(),
                }))
            }
            Err(e) => ToolResult::failure(format!("write {path}: {e}")),
        }
    }

    /// Exact-text replacement, first occurrence only. More reliable than
    /// patch application for model-generated edits.
    fn replace_in_file(&self, args: &serde_json::Value) -> ToolResult {
        let (Some(path), Some(old_text), Some(new_text)) = (
            args["path"].as_str(),
            args["old_text"].as_str(),
            args["new_text"].as_str(),
        ) else {
            return ToolResult::failure(
                "replace_in_file requires 'path', 'old_text' and 'new_text'",
            );
        };
        let target = match self.jail.resolve(path) {
            Ok(t) => t,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        let content = match std::fs::read_to_string(&target) {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("read {path}: {e}")),
        };
        if !content.contains(old_text) {
            return ToolResult::failure(format!("old_text not found in {path}"));
        }
        let new_content = content.replacen(old_text, new_text, 1);
        match std::fs::write(&target, new_content) {
            Ok(()) => {
                tracing::info!(path, "text replaced");
                ToolResult::success(serde_json::json!({ "edited": path }))
            }
            Err(e) => ToolResult::failure(format!("write {path}: {e}")),
        }
    }

    fn list_files(&self, args: &serde_json::Value) -> ToolResult {
        let depth = args["depth"].as_u64().unwrap_or(3) as usize;
        let mut files = workspace_tree(self.jail.root(), depth);
        let truncated = files.len() > TREE_CAP;
        files.truncate(TREE_CAP);
        ToolResult::success(serde_json::json!({
            "files": files,
            "truncated": truncated,
        }))
    }

    fn search(&self, args: &serde_json::Value) -> ToolResult {
        let Some(pattern) = args["pattern"].as_str() else {
            return ToolResult::failure("search requires a 'pattern' argument");
        };
        let regex = match regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("invalid pattern: {e}")),
        };

        let mut matches = Vec::new();
        for rel in workspace_tree(self.jail.root(), usize::MAX) {
            let Ok(target) = self.jail.resolve(&rel) else {
                continue;
            };
            let Ok(text) = std::fs::read_to_string(&target) else {
                continue;
            };
            for (i, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(serde_json::json!({
                        "file": rel,
                        "line": i + 1,
                        "text": line.trim_end(),
                    }));
                    if matches.len() >= SEARCH_CAP {
                        return ToolResult::success(serde_json::json!({
                            "matches": matches,
                            "truncated": true,
                        }));
                    }
                }
            }
        }
        ToolResult::success(serde_json::json!({
            "matches": matches,
            "truncated": false,
        }))
    }
}

#[async_trait]
impl Tool for FsTool {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec {
                name: "read_file",
                description: "read a file (path relative to workspace)",
                kind: ActionKind::Read,
                risk: RiskClass::Low,
            },
            ActionSpec {
                name: "list_files",
                description: "list the workspace file tree",
                kind: ActionKind::Read,
                risk: RiskClass::Low,
            },
            ActionSpec {
                name: "search",
                description: "search workspace files for a regex pattern",
                kind: ActionKind::Read,
                risk: RiskClass::Low,
            },
            ActionSpec {
                name: "write_file",
                description: "create or overwrite a file with given content",
                kind: ActionKind::Write,
                risk: RiskClass::High,
            },
            ActionSpec {
                name: "replace_in_file",
                description: "replace exact text in an existing file (first occurrence)",
                kind: ActionKind::Write,
                risk: RiskClass::High,
            },
        ]
    }

    async fn execute(&self, action: &str, args: &serde_json::Value) -> ToolResult {
        match action {
            "read_file" => self.read_file(args),
            "list_files" => self.list_files(args),
            "search" => self.search(args),
            "write_file" => self.write_file(args),
            "replace_in_file" => self.replace_in_file(args),
            other => ToolResult::failure(format!("fs tool has no action {other:?}")),
        }
    }
}

/// Flat list of relative file paths under `root`, depth-limited, with
/// hidden and dependency/build directories skipped. Sorted for stable
/// context assembly.
#[must_use]
pub fn workspace_tree(root: &Path, max_depth: usize) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, root, 0, max_depth, &mut out);
    out.sort();
    out
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<String>) {
    if depth >= max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Symlinks can point outside the workspace; never enumerate through
        // them, even though the jail would reject reading their contents.
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            walk(root, &path, depth + 1, max_depth, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().into_owned());
        }
    }
}
