// src/config/settings.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::catalog::SpeciesCatalog;
use crate::grid::{validate_cell_size, Thresholds, DEFAULT_CELL_SIZE_DEGREES};
use crate::ingest::providers::gbif::DEFAULT_ENDPOINT;
use crate::ingest::{FetchParams, DEFAULT_LOOKBACK_YEARS, DEFAULT_MAX_RECORDS, MAX_PAGE_SIZE};

pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

pub const ENV_CONFIG_PATH: &str = "RISK_GRID_CONFIG_PATH";
pub const ENV_BIND: &str = "RISK_GRID_BIND";
pub const ENV_MAX_RECORDS: &str = "RISK_GRID_MAX_RECORDS";
pub const ENV_ENDPOINT: &str = "RISK_GRID_ENDPOINT";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}
fn default_lookback_years() -> u32 {
    DEFAULT_LOOKBACK_YEARS
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_cell_size() -> f64 {
    DEFAULT_CELL_SIZE_DEGREES
}
fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_lookback_years")]
    pub lookback_years: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            page_size: default_page_size(),
            max_records: default_max_records(),
            lookback_years: default_lookback_years(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FetchSettings {
    pub fn params(&self, current_year: i32) -> FetchParams {
        FetchParams::new(current_year)
            .with_max_records(self.max_records)
            .with_page_size(self.page_size)
            .with_lookback_years(self.lookback_years)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GridSettings {
    #[serde(default = "default_cell_size")]
    pub cell_size_degrees: f64,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            cell_size_degrees: default_cell_size(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Everything the binary needs at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub grid: GridSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub species: SpeciesCatalog,
}

impl Settings {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s).context("parsing settings toml")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $RISK_GRID_CONFIG_PATH (must exist)
    /// 2) config/settings.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut settings = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_SETTINGS_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var(ENV_BIND) {
            self.server.bind = bind.trim().to_string();
        }
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            self.fetch.endpoint = endpoint.trim().to_string();
        }
        if let Ok(raw) = std::env::var(ENV_MAX_RECORDS) {
            self.fetch.max_records = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_RECORDS} is not a record count: {raw:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.grid
            .thresholds
            .validate()
            .context("invalid grid thresholds")?;
        validate_cell_size(self.grid.cell_size_degrees).context("invalid cell_size_degrees")?;
        if self.fetch.max_records == 0 {
            return Err(anyhow!("max_records must be positive"));
        }
        if self.fetch.endpoint.trim().is_empty() {
            return Err(anyhow!("fetch endpoint is empty"));
        }
        if self.fetch.page_size > MAX_PAGE_SIZE {
            tracing::warn!(
                page_size = self.fetch.page_size,
                max = MAX_PAGE_SIZE,
                "page_size above service maximum; requests will be clamped"
            );
        }
        Ok(())
    }
}
