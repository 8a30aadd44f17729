//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/qubit_daq.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `QUBIT_DAQ_`, nested keys split on `__`
//!
//! Experiment parameters are not part of this file; they come from per-experiment TOML
//! tables and are layered with [`crate::params::ConfigBuilder`]. The optional
//! `[experiments.<name>]` tables here act as site defaults for those parameters.
//!
//! # Example
//! ```no_run
//! use qubit_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), qubit_daq::error::SweepError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, SweepError};
use crate::params::ExperimentConfig;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/qubit_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and logging
    pub application: ApplicationConfig,
    /// Record writer and data folders
    pub storage: StorageConfig,
    /// Readout board settings
    #[serde(default)]
    pub sequencer: SequencerConfig,
    /// Account profile location
    #[serde(default)]
    pub profiles: ProfilesConfig,
    /// Site defaults per experiment name
    #[serde(default)]
    pub experiments: BTreeMap<String, toml::Table>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Where and how data records are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Record writer (json, hdf5)
    pub backend: String,
    /// Root of the dated data folders
    pub output_dir: PathBuf,
    /// Sub-folder between `output_dir` and the experiment folders
    #[serde(default)]
    pub outer_folder: Option<String>,
    /// Rewrite the SVG plot every n-th update
    #[serde(default = "default_plot_every")]
    pub plot_every: usize,
}

/// Readout board settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Number of readout channels
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Reload pulse memory before every acquisition
    #[serde(default = "default_load_pulses")]
    pub load_pulses: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            load_pulses: default_load_pulses(),
        }
    }
}

/// Account profile storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Folder holding `default.json` and one JSON file per account
    #[serde(default = "default_account_dir")]
    pub account_dir: PathBuf,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            account_dir: default_account_dir(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_plot_every() -> usize {
    1
}

fn default_channels() -> usize {
    1
}

fn default_load_pulses() -> bool {
    true
}

fn default_account_dir() -> PathBuf {
    PathBuf::from("config/accounts")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "qubit_daq".to_string(),
                log_level: "info".to_string(),
                log_format: default_log_format(),
            },
            storage: StorageConfig {
                backend: "json".to_string(),
                output_dir: PathBuf::from("data"),
                outer_folder: None,
                plot_every: default_plot_every(),
            },
            sequencer: SequencerConfig::default(),
            profiles: ProfilesConfig::default(),
            experiments: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// Example override: `QUBIT_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path. Missing keys fall back to [`AppConfig::default`].
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUBIT_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let valid_backends = ["json", "hdf5"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            )));
        }

        if self.storage.plot_every == 0 {
            return Err(SweepError::Configuration(
                "storage.plot_every must be at least 1".to_string(),
            ));
        }

        if self.sequencer.channels == 0 {
            return Err(SweepError::Configuration(
                "sequencer.channels must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Site defaults for experiment `name`, empty when none are configured.
    pub fn experiment_defaults(&self, name: &str) -> ExperimentConfig {
        self.experiments
            .get(name)
            .cloned()
            .map(ExperimentConfig::from_toml_table)
            .unwrap_or_default()
    }

    /// Folder that holds the per-experiment data folders.
    pub fn data_root(&self) -> PathBuf {
        match &self.storage.outer_folder {
            Some(outer) => self.storage.output_dir.join(outer),
            None => self.storage.output_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[application]
name = "Fridge 2"
log_level = "debug"
log_format = "compact"

[storage]
backend = "json"
output_dir = "/data"
outer_folder = "cooldown_9"

[sequencer]
channels = 2

[experiments.transmission]
TransSpan = 1.5
TransNumPoints = 61
"#;

    #[test]
    fn loads_file_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("qubit_daq.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.application.name, "Fridge 2");
        assert_eq!(config.sequencer.channels, 2);
        assert!(config.sequencer.load_pulses);
        assert_eq!(config.storage.plot_every, 1);
        assert_eq!(config.profiles.account_dir, PathBuf::from("config/accounts"));
        assert_eq!(config.data_root(), PathBuf::from("/data/cooldown_9"));
        assert!(config.validate().is_ok());

        let defaults = config.experiment_defaults("transmission");
        assert_eq!(defaults.get_usize("TransNumPoints").unwrap(), 61);
        assert!(config.experiment_defaults("chi_shift").is_empty());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.storage.backend, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(SweepError::Configuration(_))));
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = "csv".to_string();
        assert!(config.validate().is_err());
    }
}
