use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use warden_usage::ledger::DEFAULT_LEDGER_PATH;
use warden_usage::source::DEFAULT_REPORT_PATH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Rewrites the usage report before each read, e.g. the manager's wg hook.
    #[serde(default)]
    pub refresh_command: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
}

fn default_report_path() -> PathBuf {
    PathBuf::from(DEFAULT_REPORT_PATH)
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}

fn default_interval_secs() -> u64 {
    60
}

fn default_cycle_timeout_secs() -> u64 {
    120
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            report_path: default_report_path(),
            ledger_path: default_ledger_path(),
            refresh_command: None,
            interval_secs: default_interval_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
        }
    }
}

impl NodeConfig {
    pub fn load() -> Result<Self> {
        let config_paths = vec!["/etc/warden/node.toml", "./node.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return toml::from_str(&contents).with_context(|| format!("invalid config {path}"));
            }
        }

        tracing::info!("Loading config from environment");
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            report_path: lookup("WARDEN_REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_path),
            ledger_path: lookup("WARDEN_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            refresh_command: lookup("WARDEN_REFRESH_COMMAND").filter(|c| !c.trim().is_empty()),
            interval_secs: lookup("WARDEN_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.interval_secs),
            cycle_timeout_secs: lookup("WARDEN_CYCLE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cycle_timeout_secs),
        }
    }
}
