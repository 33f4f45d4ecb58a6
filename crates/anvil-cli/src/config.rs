//! Layered configuration
//!
//! Defaults, then `.anvil/config.toml` in the workspace, then `ANVIL_*`
//! environment variables. The API key is env-only so it never lands in a
//! file that checkpoints would commit.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use anvil_core::types::ApprovalMode;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI-compatible chat completions endpoint
    pub engine_url: String,
    /// Model name passed to the endpoint
    pub engine_model: String,
    /// Bearer token, if the endpoint needs one (env-only)
    pub api_key: Option<String>,
    /// Configured approval mode
    pub approval_mode: ApprovalMode,
    /// Iteration budget
    pub max_iterations: u32,
    /// Intermediate checkpoint every K file-modifying actions
    pub checkpoint_interval: u32,
    /// Shell command timeout
    pub command_timeout: Duration,
    /// Extra deny patterns appended to the built-in denylist
    pub extra_deny: Vec<String>,
    /// Allowlist; non-empty switches the guard to deny-by-default
    pub allow: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_url: "http://localhost:11434/v1/chat/completions".to_string(),
            engine_model: "qwen2.5-coder".to_string(),
            api_key: None,
            approval_mode: ApprovalMode::Ask,
            max_iterations: 15,
            checkpoint_interval: 3,
            command_timeout: Duration::from_secs(120),
            extra_deny: Vec::new(),
            allow: Vec::new(),
        }
    }
}

/// On-disk shape; every field optional so partial files work.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    engine_url: Option<String>,
    engine_model: Option<String>,
    approval_mode: Option<String>,
    max_iterations: Option<u32>,
    checkpoint_interval: Option<u32>,
    command_timeout_secs: Option<u64>,
    deny: Option<Vec<String>>,
    allow: Option<Vec<String>>,
}

impl Config {
    /// Load configuration for a workspace.
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        let path = workspace.join(".anvil").join("config.toml");
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let file: FileConfig = toml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            cfg.apply_file(file)?;
            tracing::debug!(path = %path.display(), "config file loaded");
        }

        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: FileConfig) -> anyhow::Result<()> {
        if let Some(url) = file.engine_url {
            self.engine_url = url;
        }
        if let Some(model) = file.engine_model {
            self.engine_model = model;
        }
        if let Some(mode) = file.approval_mode {
            self.approval_mode = mode.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(n) = file.max_iterations {
            self.max_iterations = n;
        }
        if let Some(n) = file.checkpoint_interval {
            self.checkpoint_interval = n;
        }
        if let Some(secs) = file.command_timeout_secs {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(deny) = file.deny {
            self.extra_deny = deny;
        }
        if let Some(allow) = file.allow {
            self.allow = allow;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("ANVIL_ENGINE_URL") {
            self.engine_url = url;
        }
        if let Ok(model) = std::env::var("ANVIL_ENGINE_MODEL") {
            self.engine_model = model;
        }
        if let Ok(key) = std::env::var("ANVIL_ENGINE_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(mode) = std::env::var("ANVIL_APPROVAL_MODE") {
            self.approval_mode = mode.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(n) = std::env::var("ANVIL_MAX_ITERATIONS") {
            self.max_iterations = n.parse().context("ANVIL_MAX_ITERATIONS")?;
        }
        if let Ok(n) = std::env::var("ANVIL_CHECKPOINT_INTERVAL") {
            self.checkpoint_interval = n.parse().context("ANVIL_CHECKPOINT_INTERVAL")?;
        }
        if let Ok(secs) = std::env::var("ANVIL_COMMAND_TIMEOUT_SECS") {
            self.command_timeout =
                Duration::from_secs(secs.parse().context("ANVIL_COMMAND_TIMEOUT_SECS")?);
        }
        if let Ok(deny) = std::env::var("ANVIL_DENY") {
            self.extra_deny = split_list(&deny);
        }
        if let Ok(allow) = std::env::var("ANVIL_ALLOW") {
            self.allow = split_list(&allow);
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.max_iterations, 15);
        assert_eq!(cfg.checkpoint_interval, 3);
        assert_eq!(cfg.approval_mode, ApprovalMode::Ask);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".anvil")).unwrap();
        fs::write(
            dir.path().join(".anvil/config.toml"),
            "approval_mode = \"paranoid\"\nmax_iterations = 5\n",
        )
        .unwrap();

        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.approval_mode, ApprovalMode::Paranoid);
        assert_eq!(cfg.max_iterations, 5);
        // Untouched fields keep defaults.
        assert_eq!(cfg.checkpoint_interval, 3);
    }

    #[test]
    fn bad_mode_in_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".anvil")).unwrap();
        fs::write(
            dir.path().join(".anvil/config.toml"),
            "approval_mode = \"yolo\"\n",
        )
        .unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn deny_and_allow_lists_parse_from_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".anvil")).unwrap();
        fs::write(
            dir.path().join(".anvil/config.toml"),
            "deny = [\"curl\"]\nallow = [\"cargo\", \"git\"]\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.extra_deny, vec!["curl"]);
        assert_eq!(cfg.allow, vec!["cargo", "git"]);
    }

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
    }
}
