//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use rd_domain::config::Config;
use rd_domain::error::Result;

#[derive(Debug, Parser)]
#[command(name = "reduck", about = "Voice bridge between you and a code agent", version)]
pub struct Cli {
    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Do not open the UI in a browser on startup.
    #[arg(long)]
    pub no_browser: bool,

    /// Path to a reduck.toml config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project working directory the agent runs under.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Agent CLI binary (name on PATH or full path).
    #[arg(long)]
    pub agent_bin: Option<PathBuf>,

    /// Agent config directory override.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

impl Cli {
    /// Load the config file and fold the CLI flags over it.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if self.no_browser {
            config.server.open_browser = false;
        }
        if let Some(ref cwd) = self.cwd {
            config.project_cwd = cwd.clone();
        }
        if let Some(ref bin) = self.agent_bin {
            config.agent.binary = bin.clone();
        }
        if let Some(ref dir) = self.config_dir {
            config.agent.config_dir = Some(dir.clone());
        }
        Ok(config)
    }
}
