//! Runtime settings: an optional TOML file overridden by `DMM_*` variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::calibration::CalibrationPolicy;
use crate::meter::SimulatorSettings;
use crate::status::StatusComposer;

pub const DEFAULT_CONFIG_FILE: &str = "dmm.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub success_prefix: String,
    pub error_prefix: String,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            success_prefix: "PASS".into(),
            error_prefix: "FAIL".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: Option<String>,
    pub baud: u32,
    pub eprom_image: PathBuf,
    /// Pause after every dispatched command.
    pub command_spacing_ms: u64,
    /// Longest wait for one input line per poll cycle.
    pub line_timeout_ms: u64,
    pub write_ready_timeout_ms: u64,
    /// Readings averaged by `DMMMeasureAvg`.
    pub average_count: usize,
    pub calibration: CalibrationPolicy,
    pub simulator: SimulatorSettings,
    pub status: StatusSettings,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            eprom_image: PathBuf::from("dmm_eprom.bin"),
            command_spacing_ms: 10,
            line_timeout_ms: 10,
            write_ready_timeout_ms: 100,
            average_count: 20,
            calibration: CalibrationPolicy::default(),
            simulator: SimulatorSettings::default(),
            status: StatusSettings::default(),
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn command_spacing(&self) -> Duration {
        Duration::from_millis(self.command_spacing_ms)
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }

    pub fn write_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ready_timeout_ms)
    }

    pub fn composer(&self) -> StatusComposer {
        StatusComposer::new(
            self.status.success_prefix.clone(),
            self.status.error_prefix.clone(),
        )
    }

    /// Parses settings from TOML text; missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads `path`, or [`DEFAULT_CONFIG_FILE`] when `None`, then applies
    /// environment overrides. A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                Self::from_toml(&raw)?
            }
            None => match fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(raw) => Self::from_toml(&raw)?,
                Err(_) => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Applies `DMM_PORT`, `DMM_BAUD`, `DMM_EPROM` and `DMM_LOG`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DMM_PORT") {
            self.port = Some(v);
        }
        if let Some(v) = var("DMM_BAUD") {
            match v.parse() {
                Ok(baud) => self.baud = baud,
                Err(_) => warn!(value = %v, "ignoring invalid DMM_BAUD"),
            }
        }
        if let Some(v) = var("DMM_EPROM") {
            self.eprom_image = PathBuf::from(v);
        }
        if let Some(v) = var("DMM_LOG") {
            self.log_filter = v;
        }
    }
}
