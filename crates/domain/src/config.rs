//! Runtime configuration.
//!
//! Loaded from an optional `reduck.toml`, then overridden by environment
//! variables and CLI flags. Everything has a sensible default so the
//! binary runs with no config file at all.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming the agent's config directory.
pub const AGENT_CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Project working directory the agent runs under.
    #[serde(default = "d_cwd")]
    pub project_cwd: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Open the UI in a browser on startup.
    #[serde(default = "d_true")]
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            open_browser: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent CLI binary. A bare name is resolved on PATH.
    #[serde(default = "d_agent_bin")]
    pub binary: PathBuf,
    /// Override for the agent's config directory (defaults to
    /// `~/.claude`, or `$CLAUDE_CONFIG_DIR` when set).
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: d_agent_bin(),
            config_dir: None,
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    4910
}
fn d_true() -> bool {
    true
}
fn d_agent_bin() -> PathBuf {
    PathBuf::from("claude")
}
fn d_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading and derived paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Load from a TOML file, or defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
            }
            _ => Self {
                project_cwd: d_cwd(),
                ..Self::default()
            },
        };
        if config.project_cwd.as_os_str().is_empty() {
            config.project_cwd = d_cwd();
        }
        Ok(config)
    }

    /// The agent's config directory: explicit override, then the
    /// environment, then `~/.claude`.
    pub fn config_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.agent.config_dir {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var(AGENT_CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
    }

    /// Directory holding this project's conversation logs:
    /// `<configDir>/projects/<slug>`.
    pub fn sessions_dir(&self) -> PathBuf {
        self.config_dir()
            .join("projects")
            .join(project_slug(&self.project_cwd))
    }

    /// Sanity checks; returns human-readable problems.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.project_cwd.is_dir() {
            issues.push(format!(
                "project_cwd does not exist: {}",
                self.project_cwd.display()
            ));
        }
        if self.project_cwd.starts_with(self.config_dir()) {
            issues.push(format!(
                "project_cwd {} is inside the agent config dir {}",
                self.project_cwd.display(),
                self.config_dir().display()
            ));
        }
        issues
    }
}

/// Map a project path to its log-directory slug: every character that is
/// not ASCII-alphanumeric becomes `-`.
pub fn project_slug(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
