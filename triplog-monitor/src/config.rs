//! Monitor configuration: CLI defaults, optionally overridden by a JSON
//! config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use triplog_obd_lib::{Pid, ALL_PIDS, MAX_PIDS_PER_REQUEST};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Adapter address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Parameter names to monitor (kebab-case, see `Pid`).
    #[serde(default = "default_pids")]
    pub pids: Vec<String>,
    /// Most parameters per poll request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_address() -> String {
    "127.0.0.1:35000".to_string()
}

fn default_pids() -> Vec<String> {
    ALL_PIDS.iter().map(|pid| pid.name().to_string()).collect()
}

const fn default_chunk_size() -> usize {
    MAX_PIDS_PER_REQUEST
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            pids: default_pids(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl MonitorConfig {
    /// Load a config file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Resolve the configured parameter names against the registry.
    pub fn resolve_pids(&self) -> Result<Vec<Pid>> {
        self.pids
            .iter()
            .map(|name| name.parse::<Pid>().context("in config field \"pids\""))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_parameters() {
        let config = MonitorConfig::default();
        assert_eq!(config.address, "127.0.0.1:35000");
        assert_eq!(config.chunk_size, 3);
        assert_eq!(config.resolve_pids().unwrap().len(), ALL_PIDS.len());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"pids": ["engine-speed", "fuel-tank-level"]}"#).unwrap();
        assert_eq!(config.address, "127.0.0.1:35000");
        assert_eq!(
            config.resolve_pids().unwrap(),
            vec![Pid::EngineSpeed, Pid::FuelTankLevel]
        );
    }

    #[test]
    fn unknown_parameter_name_is_an_error() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"pids": ["warp-core-temperature"]}"#).unwrap();
        assert!(config.resolve_pids().is_err());
    }
}
