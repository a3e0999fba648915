// Runtime settings for long scans, compaction and checkout
//
// Resolution order:
// 1) Defaults from constants.rs
// 2) <config dir>/camtrap/config.json (missing file keeps defaults)
// 3) Environment overrides (CAMTRAP_PROGRESS_INTERVAL_MS, etc.)

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_FILENAME, CONFIG_FOLDER, DEFAULT_COMPACTION_KEY_THRESHOLD, DEFAULT_PROGRESS_INTERVAL_MS,
};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Minimum time between two progress reports of a long scan.
    pub progress_interval_ms: u64,
    /// Compact the destination after every merge.
    pub compact_after_merge: bool,
    /// Compact a freshly checked-out store so its keys start at 1.
    pub compact_after_checkout: bool,
    /// A store whose largest record key exceeds this is compacted after a merge.
    pub compaction_key_threshold: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            compact_after_merge: false,
            compact_after_checkout: true,
            compaction_key_threshold: DEFAULT_COMPACTION_KEY_THRESHOLD,
        }
    }
}

impl SyncConfig {
    /// Load from the platform config directory, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u64>("CAMTRAP_PROGRESS_INTERVAL_MS") {
            self.progress_interval_ms = v;
        }
        if let Some(v) = env_parse::<bool>("CAMTRAP_COMPACT_AFTER_MERGE") {
            self.compact_after_merge = v;
        }
        if let Some(v) = env_parse::<bool>("CAMTRAP_COMPACT_AFTER_CHECKOUT") {
            self.compact_after_checkout = v;
        }
        if let Some(v) = env_parse::<i64>("CAMTRAP_COMPACTION_KEY_THRESHOLD") {
            self.compaction_key_threshold = v;
        }
    }
}

/// <config dir>/camtrap/config.json, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join(CONFIG_FOLDER).join(CONFIG_FILENAME))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = SyncConfig::from_file(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"compactAfterMerge": true}"#).unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        assert!(config.compact_after_merge);
        assert_eq!(config.progress_interval_ms, DEFAULT_PROGRESS_INTERVAL_MS);
        assert!(config.compact_after_checkout);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncConfig::from_file(&path).is_err());
    }
}
