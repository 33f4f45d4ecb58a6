//! Workspace jail: path confinement
//!
//! Every file read/write/search in anvil resolves its path through
//! [`WorkspaceJail::resolve`] before touching storage. There is no other
//! path to the filesystem. The jail is pure validation: the only I/O it
//! performs is what symlink resolution requires.

use std::path::{Component, Path, PathBuf};

use crate::error::GuardError;

/// Path confinement boundary for a single workspace root.
///
/// Rejection cases, checked in order:
/// 1. absolute paths outside the root
/// 2. `..`/`.` traversal that lexically leaves the root
/// 3. symlinks whose *target* leaves the root, even when the link itself
///    sits inside the workspace
#[derive(Debug, Clone)]
pub struct WorkspaceJail {
    root: PathBuf,
}

impl WorkspaceJail {
    /// Create a jail over `root`. The root must exist and be a directory;
    /// it is canonicalized once so later prefix checks see real paths.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, GuardError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(GuardError::Root(format!(
                "not a directory: {}",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// Canonical workspace root.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `requested` and return its canonical absolute form.
    ///
    /// Fails with [`GuardError::PathViolation`] for any escape attempt. The
    /// target does not have to exist; nonexistent suffixes are checked
    /// against the deepest existing (canonicalized) ancestor.
    pub fn resolve(&self, requested: impl AsRef<Path>) -> Result<PathBuf, GuardError> {
        let requested = requested.as_ref();

        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };

        // Lexical pass: fold `.`/`..` without touching the filesystem, so
        // traversal is caught even for paths that do not exist yet.
        let normalized = lexical_normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(self.violation(requested, &normalized));
        }

        // Physical pass: resolve symlinks on the existing prefix and verify
        // the real target is still inside the root.
        let real = self.resolve_existing_prefix(&normalized)?;
        if !real.starts_with(&self.root) {
            return Err(self.violation(requested, &real));
        }

        Ok(real)
    }

    /// Canonicalize the deepest existing ancestor of `path` and re-append
    /// the nonexistent remainder.
    fn resolve_existing_prefix(&self, path: &Path) -> Result<PathBuf, GuardError> {
        let mut existing = path.to_path_buf();
        let mut remainder: Vec<std::ffi::OsString> = Vec::new();

        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    remainder.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                // Walked off the top without finding anything that exists.
                _ => return Ok(path.to_path_buf()),
            }
        }

        let mut real = existing.canonicalize()?;
        for part in remainder.iter().rev() {
            real.push(part);
        }
        Ok(real)
    }

    fn violation(&self, requested: &Path, resolved: &Path) -> GuardError {
        tracing::warn!(
            requested = %requested.display(),
            resolved = %resolved.display(),
            root = %self.root.display(),
            "path escapes workspace"
        );
        GuardError::PathViolation {
            requested: requested.display().to_string(),
            resolved: resolved.display().to_string(),
        }
    }
}

/// Fold `.` and `..` components without hitting the filesystem.
///
/// `..` at the top of an absolute path stays in place (and will fail the
/// prefix check), matching how an escape would actually resolve.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn jail() -> (tempfile::TempDir, WorkspaceJail) {
        let dir = tempfile::tempdir().unwrap();
        let jail = WorkspaceJail::new(dir.path()).unwrap();
        (dir, jail)
    }

    #[test]
    fn resolves_relative_path_inside_root() {
        let (dir, jail) = jail();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let resolved = jail.resolve("a.txt").unwrap();
        assert!(resolved.starts_with(jail.root()));
        assert!(resolved.ends_with("a.txt"));
    }

    #[test]
    fn resolves_nonexistent_path_inside_root() {
        let (_dir, jail) = jail();
        let resolved = jail.resolve("sub/dir/new.rs").unwrap();
        assert!(resolved.starts_with(jail.root()));
    }

    #[test]
    fn rejects_absolute_path_outside_root() {
        let (_dir, jail) = jail();
        let err = jail.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, GuardError::PathViolation { .. }));
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_dir, jail) = jail();
        for p in ["../outside.txt", "a/../../outside.txt", "../../.."] {
            let err = jail.resolve(p).unwrap_err();
            assert!(matches!(err, GuardError::PathViolation { .. }), "{p}");
        }
    }

    #[test]
    fn allows_internal_dotdot_that_stays_inside() {
        let (dir, jail) = jail();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let resolved = jail.resolve("sub/../a.txt").unwrap();
        assert!(resolved.ends_with("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_pointing_outside() {
        let (dir, jail) = jail();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = jail.resolve("link/secret").unwrap_err();
        assert!(matches!(err, GuardError::PathViolation { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn allows_symlink_pointing_inside() {
        let (dir, jail) = jail();
        fs::write(dir.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("real.txt"),
            dir.path().join("alias.txt"),
        )
        .unwrap();

        let resolved = jail.resolve("alias.txt").unwrap();
        assert!(resolved.starts_with(jail.root()));
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            WorkspaceJail::new(&file),
            Err(GuardError::Root(_))
        ));
    }
}
