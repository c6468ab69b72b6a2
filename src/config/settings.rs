//! Console settings

use crate::core::catalog::{CatalogError, ParameterCatalog};
use crate::core::scanner::TpiSettings;
use crate::core::session::DEFAULT_BASELINE_SAMPLES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser error
        source: toml::de::Error,
    },

    /// Settings could not be serialised
    #[error("Cannot serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Setting name
        key: &'static str,
        /// Violated constraint
        reason: String,
    },
}

/// Console configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Scanner serial link
    pub serial: TpiSettings,
    /// Parameter catalog source
    pub catalog: CatalogSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl ConsoleConfig {
    /// Load from `path`, or from the platform config file when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path.map(Path::to_path_buf).or_else(super::config_file) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.clone(), source },
            other => other,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "serial.port",
                reason: "must not be empty".into(),
            });
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "serial.baud_rate",
                reason: "must be positive".into(),
            });
        }
        if !(-90..=10).contains(&self.serial.rf_power_dbm) {
            return Err(ConfigError::Invalid {
                key: "serial.rf_power_dbm",
                reason: format!("{} outside -90..=10", self.serial.rf_power_dbm),
            });
        }
        if self.catalog.baseline_samples == 0 {
            return Err(ConfigError::Invalid {
                key: "catalog.baseline_samples",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Override the serial port
    #[must_use]
    pub fn with_port(mut self, port: Option<String>) -> Self {
        if let Some(port) = port {
            self.serial.port = port;
        }
        self
    }

    /// Override the catalog file
    #[must_use]
    pub fn with_params_file(mut self, file: Option<PathBuf>) -> Self {
        if file.is_some() {
            self.catalog.params_file = file;
        }
        self
    }

    /// Load the configured catalog, or the built-in one
    pub fn load_catalog(&self) -> Result<ParameterCatalog, CatalogError> {
        match &self.catalog.params_file {
            Some(path) => ParameterCatalog::from_path(path),
            None => ParameterCatalog::builtin(),
        }
    }
}

/// Catalog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Alternate JSON parameter table
    pub params_file: Option<PathBuf>,
    /// Baseline samples per measurement
    pub baseline_samples: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            params_file: None,
            baseline_samples: DEFAULT_BASELINE_SAMPLES,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a daily rolling log file
    pub file_logging: bool,
    /// Log directory; the platform data directory when unset
    pub directory: Option<PathBuf>,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Write the log file as JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_logging: true,
            directory: None,
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Directory for log files
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(super::log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.serial.port, "COM16");
        assert_eq!(config.serial.baud_rate, 3_000_000);
        assert_eq!(config.catalog.baseline_samples, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ConsoleConfig::from_toml_str(
            r#"
            [serial]
            port = "/dev/ttyUSB0"
            rf_power_dbm = -10

            [catalog]
            baseline_samples = 4

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.rf_power_dbm, -10);
        assert_eq!(config.serial.timeout_ms, 1_000);
        assert_eq!(config.catalog.baseline_samples, 4);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ConsoleConfig::from_toml_str("[serial]\nrf_power_dbm = 20\n"),
            Err(ConfigError::Invalid { key: "serial.rf_power_dbm", .. })
        ));
        assert!(matches!(
            ConsoleConfig::from_toml_str("[serial]\nport = 5\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConsoleConfig::default().with_port(Some("COM3".into()));
        config.save(&path).unwrap();
        assert_eq!(ConsoleConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, ConsoleConfig::default());
    }
}
