use crate::constants::{
    DEFAULT_LIST_TIMEOUT_MS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_RUN_TIMEOUT_MS, DEFAULT_TOOL_BIN,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
struct PartialConfig {
    tool_bin: Option<String>,
    workspace_root: Option<PathBuf>,
    run_timeout_ms: Option<u64>,
    list_timeout_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) tool_bin: String,
    pub(crate) workspace_root: Option<PathBuf>,
    pub(crate) run_timeout: Duration,
    pub(crate) list_timeout: Duration,
    pub(crate) probe_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_bin: DEFAULT_TOOL_BIN.to_string(),
            workspace_root: None,
            run_timeout: Duration::from_millis(DEFAULT_RUN_TIMEOUT_MS),
            list_timeout: Duration::from_millis(DEFAULT_LIST_TIMEOUT_MS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub(crate) fn load() -> Result<Self> {
        let mut config = Self::default();
        for path in config_paths() {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            config.apply(
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?,
            );
            break;
        }
        Ok(config)
    }

    fn apply(&mut self, parsed: PartialConfig) {
        if let Some(tool_bin) = parsed.tool_bin
            && !tool_bin.trim().is_empty()
        {
            self.tool_bin = tool_bin;
        }
        if let Some(workspace_root) = parsed.workspace_root {
            self.workspace_root = Some(workspace_root);
        }
        if let Some(ms) = parsed.run_timeout_ms {
            self.run_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed.list_timeout_ms {
            self.list_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed.probe_timeout_ms {
            self.probe_timeout = Duration::from_millis(ms);
        }
    }

    #[cfg(test)]
    pub(crate) fn from_toml(raw: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply(toml::from_str(raw)?);
        Ok(config)
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("corral").join("config.toml"));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".corral.toml"));
    }
    paths
}
