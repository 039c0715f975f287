use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::engine::EngineTimings;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuoteApiConfig {
    pub base_url: String,
}

impl Default for QuoteApiConfig {
    fn default() -> Self {
        QuoteApiConfig {
            base_url: "https://rates.example.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CurrenciesConfig {
    pub sent: String,
    pub received: String,
}

impl Default for CurrenciesConfig {
    fn default() -> Self {
        CurrenciesConfig {
            sent: "USD".to_string(),
            received: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_expiry_tick_ms")]
    pub expiry_tick_ms: u64,
    #[serde(default = "default_expiry_warning_ms")]
    pub expiry_warning_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_expiry_tick_ms() -> u64 {
    1000
}

fn default_expiry_warning_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce_ms: default_debounce_ms(),
            expiry_tick_ms: default_expiry_tick_ms(),
            expiry_warning_ms: default_expiry_warning_ms(),
        }
    }
}

impl EngineConfig {
    pub fn timings(&self) -> EngineTimings {
        EngineTimings {
            debounce: Duration::from_millis(self.debounce_ms),
            expiry_tick: Duration::from_millis(self.expiry_tick_ms),
            expiry_warning: Duration::from_millis(self.expiry_warning_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub quote_api: QuoteApiConfig,
    #[serde(default)]
    pub currencies: CurrenciesConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "ratesync", "ratesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
