//! Engine configuration.
//!
//! Loaded from a TOML file when one exists; every field has a default so
//! a missing file or empty table is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::session::IDLE_THRESHOLD_MS;

/// Tunables for the analytics engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gap length (ms) below which consecutive heartbeats count as
    /// continuous activity.
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: i64,
    /// How many times `start_session` retries its find-and-close-then-
    /// create sequence after an open-session conflict before surfacing
    /// the error.
    #[serde(default = "default_start_session_retries")]
    pub start_session_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: default_idle_threshold_ms(),
            start_session_retries: default_start_session_retries(),
        }
    }
}

const fn default_idle_threshold_ms() -> i64 {
    IDLE_THRESHOLD_MS
}

const fn default_start_session_retries() -> u32 {
    1
}

/// Load the engine config from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read engine config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse engine config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, load_config};

    #[test]
    fn defaults_match_the_engine_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_threshold_ms, 30_000);
        assert_eq!(config.start_session_retries, 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = load_config(&dir.path().join("vigil.toml")).expect("load");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "idle_threshold_ms = 10000\n").expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(config.idle_threshold_ms, 10_000);
        assert_eq!(config.start_session_retries, 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "idle_threshold_ms = \"soon\"\n").expect("write config");
        assert!(load_config(&path).is_err());
    }
}
