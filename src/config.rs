//! Layered configuration
//!
//! Provides configuration management with:
//! - Runtime defaults
//! - Config file loading (optional, `basic` feature)
//! - Environment variable overrides
//! - Validation before any page is requested
//!
//! Later layers win: defaults, then the first config file found, then the environment,
//! then command-line flags (applied by the binary), then [`Config::validate`].
//! Nothing here is global; the binary derives an [`EngineConfig`] and
//! [`DisplayOptions`] from the loaded value and passes them down.

use crate::display::DisplayOptions;
use crate::error::ConfigError;
use crate::inventory::FileErrorPolicy;
use crate::rollup::{EngineConfig, RollupDepth};
use crate::source::RetryPolicy;
use crate::timestamp_parser::TimestampParser;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Largest page a listing backend may be asked for.
pub const MAX_PAGE_SIZE: usize = 100_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Rollup configuration
    pub scan: ScanConfig,

    /// Listing backend configuration
    pub source: SourceConfig,

    /// Bulk-export configuration
    pub export: ExportConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Paths configuration
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub delimiter: String,
    pub depth: RollupDepth,
    pub display_limit: usize,
    pub prefix: String,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub on_file_error: FileErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub human_readable: bool,
    pub timezone: String,
    pub date_format: String,
    pub json_pretty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            delimiter: "/".to_string(),
            depth: RollupDepth::Unbounded,
            display_limit: 1000,
            prefix: String::new(),
            page_size: 1000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            human_readable: false,
            timezone: "+00:00".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            json_pretty: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults.
    ///
    /// Not validated yet: the binary applies its flags first.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                info!(config_file = %path.display(), "Loading configuration from file");
                Self::load_from_file(&path)?
            }
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Candidate config files, in lookup order.
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("s3du.toml"), PathBuf::from(".s3du.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("s3du").join("config.toml"));
        }
        paths
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml")]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    #[cfg(not(feature = "toml"))]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        anyhow::bail!(
            "Config file {} found but this build has no TOML support",
            path.display()
        )
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Logging overrides
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // Scan overrides
        if let Ok(val) = env::var("S3DU_DELIMITER") {
            self.scan.delimiter = val;
        }
        if let Ok(val) = env::var("S3DU_DEPTH") {
            self.scan.depth = val.parse().context("Invalid S3DU_DEPTH")?;
        }
        if let Ok(val) = env::var("S3DU_DISPLAY_LIMIT") {
            self.scan.display_limit = val.parse().context("Invalid S3DU_DISPLAY_LIMIT")?;
        }
        if let Ok(val) = env::var("S3DU_PREFIX") {
            self.scan.prefix = val;
        }
        if let Ok(val) = env::var("S3DU_PAGE_SIZE") {
            self.scan.page_size = val.parse().context("Invalid S3DU_PAGE_SIZE")?;
        }

        // Source overrides
        if let Ok(val) = env::var("S3DU_MAX_RETRIES") {
            self.source.max_retries = val.parse().context("Invalid S3DU_MAX_RETRIES")?;
        }

        // Output overrides
        if let Ok(val) = env::var("S3DU_TIMEZONE") {
            self.output.timezone = val;
        }

        // Path overrides
        if let Ok(val) = env::var("S3DU_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config().validate()?;

        if self.scan.page_size == 0 || self.scan.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidPageSize {
                got: self.scan.page_size,
                max: MAX_PAGE_SIZE,
            });
        }

        if TimestampParser::parse_offset(&self.output.timezone).is_none() {
            return Err(ConfigError::InvalidTimezone(self.output.timezone.clone()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format",
                reason: format!("expected \"pretty\" or \"json\", got {:?}", self.logging.format),
            });
        }
        if !matches!(self.logging.output.as_str(), "console" | "file" | "both") {
            return Err(ConfigError::InvalidValue {
                field: "logging.output",
                reason: format!(
                    "expected \"console\", \"file\" or \"both\", got {:?}",
                    self.logging.output
                ),
            });
        }

        Ok(())
    }

    /// Settings handed to the rollup engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            delimiter: self.scan.delimiter.clone(),
            depth: self.scan.depth,
            display_limit: self.scan.display_limit,
            prefix: self.scan.prefix.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.source.max_retries,
            base_delay: Duration::from_millis(self.source.retry_base_delay_ms),
        }
    }

    /// Console rendering options; fails on an invalid timezone.
    pub fn display_options(&self, color: bool) -> Result<DisplayOptions, ConfigError> {
        let offset = TimestampParser::parse_offset(&self.output.timezone)
            .ok_or_else(|| ConfigError::InvalidTimezone(self.output.timezone.clone()))?;

        Ok(DisplayOptions {
            human: self.output.human_readable,
            color,
            offset,
            date_format: self.output.date_format.clone(),
        })
    }

    /// Save current configuration to file
    #[cfg(feature = "toml")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }

    /// Effective configuration as TOML text
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.scan.delimiter, "/");
        assert_eq!(config.scan.depth, RollupDepth::Unbounded);
        assert_eq!(config.scan.display_limit, 1000);
        assert_eq!(config.export.on_file_error, FileErrorPolicy::Fail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.scan.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPageSize { got: 0, .. })
        ));

        let mut config = Config::default();
        config.scan.delimiter.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyDelimiter));

        let mut config = Config::default();
        config.output.timezone = "Mars/Olympus".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_engine_config_mirrors_scan_section() {
        let mut config = Config::default();
        config.scan.depth = RollupDepth::Limited(2);
        config.scan.prefix = "logs/".to_string();

        let engine = config.engine_config();
        assert_eq!(engine.depth, RollupDepth::Limited(2));
        assert_eq!(engine.prefix, "logs/");
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            depth = "all"
            display_limit = 5

            [export]
            on_file_error = "skip"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.depth, RollupDepth::Unbounded);
        assert_eq!(config.scan.display_limit, 5);
        assert_eq!(config.scan.page_size, 1000);
        assert_eq!(config.export.on_file_error, FileErrorPolicy::Skip);
        assert_eq!(config.logging.level, "WARN");

        let depth_two: Config = toml::from_str("[scan]\ndepth = 2\n").unwrap();
        assert_eq!(depth_two.scan.depth, RollupDepth::Limited(2));
    }
}
