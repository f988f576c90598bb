//! Run configuration: embedded defaults, optionally overlaid by a user TOML file.

use crate::runtime::ApiVersion;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Embed the defaults directly in the binary at compile time
const DEFAULTS_TOML: &str = include_str!("../defaults.toml");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub runtime_binary: PathBuf,
    pub log_file: PathBuf,
    pub check_timeout_secs: u64,
    pub min_volume_api_version: ApiVersion,
    pub strict_volume_support: bool,
}

/// Same keys as `Config`, all optional, for user overrides
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    runtime_binary: Option<PathBuf>,
    log_file: Option<PathBuf>,
    check_timeout_secs: Option<u64>,
    min_volume_api_version: Option<ApiVersion>,
    strict_volume_support: Option<bool>,
}

impl Config {
    /// Built-in defaults
    pub fn defaults() -> Result<Self> {
        toml::from_str(DEFAULTS_TOML).context("Failed to parse built-in defaults")
    }

    /// Defaults, overlaid with the file at `path` when one is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults()?;
        if let Some(path) = path {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            config
                .apply_toml(&text)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
        }
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let overlay: ConfigOverlay = toml::from_str(text)?;

        if let Some(binary) = overlay.runtime_binary {
            self.runtime_binary = binary;
        }
        if let Some(log_file) = overlay.log_file {
            self.log_file = log_file;
        }
        if let Some(secs) = overlay.check_timeout_secs {
            self.check_timeout_secs = secs;
        }
        if let Some(version) = overlay.min_volume_api_version {
            self.min_volume_api_version = version;
        }
        if let Some(strict) = overlay.strict_volume_support {
            self.strict_volume_support = strict;
        }
        Ok(())
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs.max(1))
    }
}
