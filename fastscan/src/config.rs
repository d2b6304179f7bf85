//! Configuration file.
//!
//! ```toml
//! [scan]
//! pid = 900
//! provider = "Canal Digitaal"
//! bouquet = "canaldigitaal"
//! frontend = 0
//! original_numbering = true
//! fixed_service_info = false
//! table_timeout_ms = 5000
//! check_crc = true
//!
//! [output]
//! dir = "bouquets"
//!
//! [logging]
//! log_dir = "logs"
//! retention_days = 7
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::scan::ScanOptions;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fastscan.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ScanSection {
    pub pid: Option<u16>,
    pub provider: Option<String>,
    pub bouquet: Option<String>,
    pub frontend: Option<u32>,
    pub original_numbering: Option<bool>,
    pub fixed_service_info: Option<bool>,
    pub table_timeout_ms: Option<u64>,
    pub check_crc: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct OutputSection {
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

/// Scan settings given on the command line. Unset values fall back to the
/// config file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOverrides {
    pub pid: Option<u16>,
    pub provider: Option<String>,
    pub bouquet: Option<String>,
    pub frontend: Option<u32>,
    pub original_numbering: Option<bool>,
    pub fixed_service_info: Option<bool>,
    pub table_timeout_ms: Option<u64>,
    pub check_crc: Option<bool>,
}

/// Load a configuration file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Resolve the config path: explicit path, then `fastscan.toml` if present.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    })
}

impl ConfigFile {
    /// Merge command line overrides over the file values and defaults.
    pub fn scan_options(&self, overrides: &ScanOverrides) -> ScanOptions {
        let defaults = ScanOptions::default();
        let scan = &self.scan;

        let provider = overrides
            .provider
            .clone()
            .or_else(|| scan.provider.clone())
            .unwrap_or_else(|| defaults.build.provider.clone());
        // Bouquet file names default to the provider name
        let bouquet = overrides
            .bouquet
            .clone()
            .or_else(|| scan.bouquet.clone())
            .unwrap_or_else(|| bouquet_name(&provider));

        let mut options = ScanOptions {
            frontend: overrides.frontend.or(scan.frontend).unwrap_or(defaults.frontend),
            pid: overrides.pid.or(scan.pid).unwrap_or(defaults.pid),
            check_crc: overrides
                .check_crc
                .or(scan.check_crc)
                .unwrap_or(defaults.check_crc),
            table_timeout: overrides
                .table_timeout_ms
                .or(scan.table_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.table_timeout),
            build: defaults.build,
        };

        options.build.provider = provider;
        options.build.bouquet = bouquet;
        options.build.original_numbering = overrides
            .original_numbering
            .or(scan.original_numbering)
            .unwrap_or(false);
        options.build.fixed_service_info = overrides
            .fixed_service_info
            .or(scan.fixed_service_info)
            .unwrap_or(false);
        options
    }

    /// Output directory for bouquet files.
    pub fn output_dir(&self, overridden: Option<PathBuf>) -> PathBuf {
        overridden
            .or_else(|| self.output.dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Bouquet name used when a provider label has no usable characters.
const FALLBACK_BOUQUET_NAME: &str = "fastscan";

/// Lowercase alphanumeric bouquet name derived from a provider label.
pub fn bouquet_name(provider: &str) -> String {
    let name: String = provider
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if name.is_empty() {
        FALLBACK_BOUQUET_NAME.to_string()
    } else {
        name
    }
}
