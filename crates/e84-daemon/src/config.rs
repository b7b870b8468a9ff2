//! Daemon-level configuration: where to bind, and where to find the
//! controller's own JSON configuration (spec §6). Distinct from
//! [`e84_core::ControllerConfig`], which this module loads from disk.

use std::path::PathBuf;

use serde::Serialize;
use utoipa::ToSchema;

/// Everything the binary needs that isn't part of the controller's own
/// config document.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub controller_config_path: String,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8884".to_string(),
            controller_config_path: "./e84.config.json".to_string(),
            log_level: std::env::var("E84CTL_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl DaemonConfig {
    /// Apply `E84CTL_*` environment overrides on top of [`Default`].
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("E84CTL_BIND") {
            config.bind_addr = bind;
        }
        if let Ok(path) = std::env::var("E84CTL_CONFIG") {
            config.controller_config_path = path;
        }
        if let Ok(level) = std::env::var("E84CTL_LOG") {
            config.log_level = level;
        }

        config
    }
}

/// Load and validate the controller configuration document named by
/// `path` (spec §6/§7 — malformed or inconsistent config is rejected at
/// startup, not discovered mid-run).
pub fn load_controller_config(path: &str) -> anyhow::Result<e84_core::ControllerConfig> {
    let raw = std::fs::read_to_string(PathBuf::from(path))
        .map_err(|e| anyhow::anyhow!("reading controller config {path}: {e}"))?;
    let config: e84_core::ControllerConfig = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing controller config {path}: {e}"))?;
    config.validate()?;
    Ok(config)
}
