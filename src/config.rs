use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    DashboardError,
    dispatcher::{DEFAULT_TICK_INTERVAL_MS, UnavailablePolicy},
    display::board::{DEFAULT_COMPUTE_UNIT, DEFAULT_MODEL_NAME},
};

const CONFIG_DIR_NAME: &str = "avdash";
const CONFIG_FILE_NAME: &str = "config.json";

/// How the live command prints each tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// The published dashboard board, one card per section
    #[default]
    Text,
    /// Every dispatched snapshot as a JSON line
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub tick_interval_ms: u64,
    pub unavailable_policy: UnavailablePolicy,
    /// Fixed seed for the simulated source, random when unset
    pub seed: Option<u64>,
    pub output_format: OutputFormat,
    pub model_name: String,
    pub compute_unit: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            unavailable_policy: UnavailablePolicy::default(),
            seed: None,
            output_format: OutputFormat::default(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            compute_unit: DEFAULT_COMPUTE_UNIT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config from the user's config directory, `None` if it was never saved.
    pub fn from_local_file() -> Result<Option<Self>, DashboardError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Read a saved config as-is. Call [`AppConfig::validate`] once any overrides
    /// are applied, so a bad saved value can still be corrected from the CLI.
    pub fn from_path(path: &Path) -> Result<Self, DashboardError> {
        debug!("Loading config from {:?}", path);
        let file = File::open(path).map_err(|e| DashboardError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map_err(|e| DashboardError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<PathBuf, DashboardError> {
        let config_path = Self::default_path().ok_or(DashboardError::NoConfigDir)?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), DashboardError> {
        self.validate()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DashboardError::ConfigIOError { source: e })?;
        }

        let file = File::create(config_path)
            .map_err(|e| DashboardError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| DashboardError::ConfigSerializeError { source: e })
    }

    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.tick_interval_ms == 0 {
            return Err(DashboardError::InvalidConfig {
                field: "tick_interval_ms".to_string(),
                reason: "must be a positive number of milliseconds".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
