//! Pipeline settings, read from a TOML file.
//!
//! ```toml
//! retention_hours = 48
//! auto_skip = true
//! default_bank = "csob"
//! banks_file = "banks.toml"
//!
//! [matching]
//! date_tolerance_days = 5
//! skip_threshold = 0.85
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tally_import::{BankConfigError, BankConfigSet, BankId, MatchConfig};
use thiserror::Error;

pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Ten years.
pub const MAX_RETENTION_HOURS: i64 = 10 * 366 * 24;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Bank configuration: {0}")]
    Banks(#[from] BankConfigError),
    #[error("retention_hours must be between 0 and {MAX_RETENTION_HOURS}, got {0}")]
    Retention(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long upload, preview and rollback records stay retrievable.
    pub retention_hours: i64,
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
    /// Drop likely duplicates without asking. Off unless the caller opts in.
    pub auto_skip: bool,
    pub matching: MatchConfig,
    pub default_bank: BankId,
    /// Extra `[[bank]]` profiles layered over the built-in ones. Relative
    /// paths resolve against the config file's directory.
    pub banks_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: ["csv", "txt", "pdf", "ofx", "qfx", "qif"]
                .into_iter()
                .map(String::from)
                .collect(),
            auto_skip: false,
            matching: MatchConfig::default(),
            default_bank: BankId::Generic,
            banks_file: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_RETENTION_HOURS).contains(&self.retention_hours) {
            return Err(ConfigError::Retention(self.retention_hours));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        if let (Some(banks), Some(dir)) = (config.banks_file.as_mut(), path.parent()) {
            if banks.is_relative() {
                *banks = dir.join(&*banks);
            }
        }
        Ok(config)
    }

    /// Out-of-range values set in code are clamped; `validate` rejects them.
    pub fn retention(&self) -> chrono::Duration {
        let hours = self.retention_hours.clamp(0, MAX_RETENTION_HOURS);
        chrono::Duration::try_hours(hours).unwrap_or_else(chrono::Duration::zero)
    }

    /// Built-in bank profiles, plus `banks_file` when set.
    pub fn bank_configs(&self) -> Result<BankConfigSet, ConfigError> {
        Ok(match &self.banks_file {
            Some(path) => BankConfigSet::load(path)?,
            None => BankConfigSet::builtin()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(!config.auto_skip);
        assert_eq!(config.matching.date_tolerance_days, 3);
        assert_eq!(config.default_bank, BankId::Generic);
        assert!(config.allowed_extensions.iter().any(|e| e == "qfx"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            retention_hours = 48
            auto_skip = true
            default_bank = "csob"

            [matching]
            skip_threshold = 0.85
            "#,
        )
        .unwrap();
        assert_eq!(config.retention_hours, 48);
        assert!(config.auto_skip);
        assert_eq!(config.default_bank, BankId::Csob);
        assert_eq!(config.matching.skip_threshold, 0.85);
        assert_eq!(config.matching.review_threshold, 0.5);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(
            PipelineConfig::from_toml("retention_hours = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn retention_out_of_range_is_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml("retention_hours = -1"),
            Err(ConfigError::Retention(-1))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("retention_hours = 9223372036854775807"),
            Err(ConfigError::Retention(_))
        ));
        let config = PipelineConfig::from_toml("retention_hours = 0").unwrap();
        assert_eq!(config.retention(), chrono::Duration::zero());
    }

    #[test]
    fn retention_set_in_code_is_clamped() {
        let config = PipelineConfig {
            retention_hours: i64::MAX,
            ..PipelineConfig::default()
        };
        assert_eq!(config.retention(), chrono::Duration::hours(MAX_RETENTION_HOURS));
        let config = PipelineConfig {
            retention_hours: -5,
            ..PipelineConfig::default()
        };
        assert_eq!(config.retention(), chrono::Duration::zero());
    }

    #[test]
    fn banks_file_resolves_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let banks = dir.path().join("banks.toml");
        std::fs::write(
            &banks,
            r#"
            [[bank]]
            id = "mybank"
            name = "My Bank"
            "#,
        )
        .unwrap();
        let config_path = dir.path().join("tally.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "banks_file = \"banks.toml\"").unwrap();

        let config = PipelineConfig::load(&config_path).unwrap();
        assert_eq!(config.banks_file.as_deref(), Some(banks.as_path()));
        let set = config.bank_configs().unwrap();
        assert!(set.get(&BankId::Custom("mybank".into())).is_some());
        assert!(set.get(&BankId::Csob).is_some());
    }
}
