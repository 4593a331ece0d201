//! Configuration loading for the StemScope client core
//!
//! Resolution follows a fixed priority order per field:
//! 1. Environment variable (highest priority)
//! 2. TOML config file (`stemscope.toml` under the platform config dir)
//! 3. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default cap on concurrently active uploads
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;

/// Default per-chart point budget handed to the decimation engine
pub const DEFAULT_CHART_TARGET_POINTS: usize = 1000;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_PUSH_BASE_URL: &str = "http://localhost:8000";

/// Raw TOML file contents; every field optional so partial files work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub api_base_url: Option<String>,
    pub push_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub max_concurrent_uploads: Option<usize>,
    pub chart_target_points: Option<usize>,
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Base URL for the REST API (upload, job status, results)
    pub api_base_url: String,
    /// Base URL for the per-job push channel
    pub push_base_url: String,
    /// Connection-parameter auth token; `None` means unauthenticated dev mode
    pub auth_token: Option<String>,
    pub max_concurrent_uploads: usize,
    pub chart_target_points: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            push_base_url: DEFAULT_PUSH_BASE_URL.to_string(),
            auth_token: None,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            chart_target_points: DEFAULT_CHART_TARGET_POINTS,
        }
    }
}

impl ScopeConfig {
    /// Resolve configuration from environment, default config file, and
    /// compiled defaults, in that order.
    pub fn load() -> Self {
        let file = match default_config_path() {
            Some(path) if path.exists() => match read_toml_config(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable config file");
                    TomlConfig::default()
                }
            },
            _ => TomlConfig::default(),
        };
        Self::resolve(file)
    }

    /// Resolve using an explicit config file path (tests, unusual setups)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file = read_toml_config(path)?;
        Ok(Self::resolve(file))
    }

    fn resolve(file: TomlConfig) -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: std::env::var("STEMSCOPE_API_URL")
                .ok()
                .or(file.api_base_url)
                .unwrap_or(defaults.api_base_url),
            push_base_url: std::env::var("STEMSCOPE_PUSH_URL")
                .ok()
                .or(file.push_base_url)
                .unwrap_or(defaults.push_base_url),
            auth_token: std::env::var("STEMSCOPE_TOKEN").ok().or(file.auth_token),
            max_concurrent_uploads: file
                .max_concurrent_uploads
                .unwrap_or(defaults.max_concurrent_uploads),
            chart_target_points: file
                .chart_target_points
                .unwrap_or(defaults.chart_target_points),
        }
    }
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stemscope").join("stemscope.toml"))
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Cannot create {}: {}", parent.display(), e)))?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Cannot serialize config: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| Error::Config(format!("Cannot write {}: {}", path.display(), e)))?;
    Ok(())
}
