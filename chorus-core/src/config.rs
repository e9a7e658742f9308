// ABOUTME: Configuration parsing from TOML file with environment variable overrides.
// ABOUTME: Validates required fields and provides sensible defaults for optional ones.

use crate::history::DEFAULT_HISTORY_CAP;
use crate::orchestrator::DispatchConfig;
use crate::providers::{ProviderDirectory, ProviderInfo};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Replaces the built-in provider directory when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Interval between readiness probes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total wait for an endpoint to report ready
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Retained query history entries
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            history_cap: default_history_cap(),
        }
    }
}

fn default_storage_path() -> String {
    "./data".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. CHORUS_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/chorus/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("CHORUS_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "chorus") {
            let xdg_config = dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using defaults");
            Config::default()
        };

        if let Ok(val) = std::env::var("CHORUS_STORAGE_PATH") {
            config.storage.path = val;
        }
        if let Ok(val) = std::env::var("CHORUS_POLL_INTERVAL_MS") {
            config.dispatch.poll_interval_ms = val.parse().with_context(|| {
                format!("CHORUS_POLL_INTERVAL_MS must be a valid number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("CHORUS_READY_TIMEOUT_SECS") {
            config.dispatch.ready_timeout_secs = val.parse().with_context(|| {
                format!("CHORUS_READY_TIMEOUT_SECS must be a valid number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("CHORUS_HISTORY_CAP") {
            config.dispatch.history_cap = val.parse().with_context(|| {
                format!("CHORUS_HISTORY_CAP must be a valid number, got: {}", val)
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.poll_interval_ms == 0 {
            anyhow::bail!("dispatch.poll_interval_ms must be greater than zero");
        }
        if self.dispatch.ready_timeout_secs == 0 {
            anyhow::bail!("dispatch.ready_timeout_secs must be greater than zero");
        }
        if self.dispatch.history_cap == 0 {
            anyhow::bail!("dispatch.history_cap must be greater than zero");
        }
        if let Some(providers) = &self.providers {
            if providers.is_empty() {
                anyhow::bail!("providers must not be an empty list when present");
            }
            for provider in providers {
                if provider.id.trim().is_empty() {
                    anyhow::bail!("Provider entries require a non-empty id");
                }
                if provider.url_patterns.is_empty() {
                    anyhow::bail!("Provider {} requires at least one url pattern", provider.id);
                }
            }
        }
        Ok(())
    }

    /// Provider directory: configured providers or the built-in set
    pub fn directory(&self) -> ProviderDirectory {
        match &self.providers {
            Some(providers) => ProviderDirectory::new(providers.clone()),
            None => ProviderDirectory::builtin(),
        }
    }

    /// Leg tunables as durations
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            poll_interval: Duration::from_millis(self.dispatch.poll_interval_ms),
            ready_timeout: Duration::from_secs(self.dispatch.ready_timeout_secs),
        }
    }
}
