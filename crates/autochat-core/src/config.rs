use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};
use url::Url;

use crate::protocol::parse_backend;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";
pub const BACKEND_URL_ENV: &str = "AUTOCHAT_BACKEND_URL";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub backend_url: Option<String>,
    /// Seconds to wait for a reply before giving up; unset waits forever
    pub response_timeout_secs: Option<u64>,
    /// `tracing` filter directive, e.g. `autochat_core=debug`
    pub log_filter: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load a config file. A missing file gives the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Backend base address: command line, then environment, then this file,
    /// then the local default.
    pub fn backend_url(&self, cli_override: Option<&str>) -> Result<Url> {
        let env = std::env::var(BACKEND_URL_ENV).ok();
        let address = pick_backend_url(cli_override, env.as_deref(), self.backend_url.as_deref());
        Ok(parse_backend(address)?)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("autochat").join("config.json"))
    }
}

fn pick_backend_url<'a>(
    cli: Option<&'a str>,
    env: Option<&'a str>,
    file: Option<&'a str>,
) -> &'a str {
    [cli, env, file]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
        .unwrap_or(DEFAULT_BACKEND_URL)
}
