//! # Configuration
//!
//! Optional YAML defaults for the lotune utilities:
//!
//! - Device selection and front-end setup (address args, antenna, subdevice,
//!   clock reference, integer-N tuning)
//! - LO tuning benchmark parameters (frequencies, offset, resolution, settle
//!   timeout)
//! - Timed GPIO parameters (bank, line mask, delay, hold)
//! - Logging
//!
//! Command-line flags override anything read here. The file is only ever
//! read.
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `LOTUNE_CONFIG` environment variable
//! 2. `./lotune.yaml` (current directory)
//! 3. `~/.config/lotune/config.yaml` (user config)
//! 4. `/etc/lotune/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! device:
//!   args: "type=b200"
//!   clock_source: external
//!   antenna: RX2
//!
//! bench:
//!   frequency: 2.4e9
//!   hop_frequency: 5.0e9
//!   resolution: 5.0e-6
//!
//! gpio:
//!   bank: FP0
//!   line_mask: 0x20
//! ```

use crate::search::{SearchConfig, DEFAULT_RESOLUTION, DEFAULT_START_OFFSET};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("config not found: {0}")]
    NotFound(String),
    /// Failed to read configuration file
    #[error("failed to read config: {0}")]
    ReadError(String),
    /// Failed to parse configuration
    #[error("failed to parse config: {0}")]
    ParseError(String),
    /// Invalid configuration value
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Reference clock source for the motherboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// Internal oscillator
    #[default]
    Internal,
    /// External 10 MHz reference input
    External,
    /// MIMO cable from another device
    Mimo,
}

impl ClockSource {
    /// Name understood by the device driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockSource::Internal => "internal",
            ClockSource::External => "external",
            ClockSource::Mimo => "mimo",
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(ClockSource::Internal),
            "external" => Ok(ClockSource::External),
            "mimo" => Ok(ClockSource::Mimo),
            other => Err(ConfigError::ValidationError(format!(
                "unsupported reference source '{}' (expected internal, external or mimo)",
                other
            ))),
        }
    }
}

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device address args (`type=b200`, `addr=...`, or a `driver://` URI)
    pub args: String,
    /// RX antenna
    pub antenna: Option<String>,
    /// RX subdevice specification
    pub subdev: Option<String>,
    /// Reference clock source
    pub clock_source: ClockSource,
    /// Tune with integer-N synthesis
    pub int_n: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            args: String::new(),
            antenna: None,
            subdev: None,
            clock_source: ClockSource::Internal,
            int_n: false,
        }
    }
}

/// LO tuning benchmark configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Baseline RF center frequency in Hz
    pub frequency: f64,
    /// Hop target frequency in Hz
    pub hop_frequency: f64,
    /// First probe offset in seconds
    pub start_offset: f64,
    /// Offset decrement per iteration in seconds
    pub resolution: f64,
    /// Lead time before each hop in seconds
    pub setup_delay: f64,
    /// Settle timeout in seconds (0 = wait forever)
    pub settle_timeout: f64,
    /// Stop at the first observed unlock
    pub stop_on_first_unlock: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            frequency: 500_000_000.0,
            hop_frequency: 5_000_000_000.0,
            start_offset: DEFAULT_START_OFFSET,
            resolution: DEFAULT_RESOLUTION,
            setup_delay: 0.010,
            settle_timeout: 5.0,
            stop_on_first_unlock: false,
        }
    }
}

impl BenchConfig {
    /// Search parameters for this benchmark.
    ///
    /// Negative, non-finite or unrepresentable durations are rejected rather
    /// than clamped. A `settle_timeout` of exactly 0 means no bound.
    pub fn search_config(&self) -> Result<SearchConfig, ConfigError> {
        let setup_delay = seconds("setup_delay", self.setup_delay)?;
        let settle_timeout = if self.settle_timeout == 0.0 {
            None
        } else {
            Some(seconds("settle_timeout", self.settle_timeout)?)
        };
        Ok(SearchConfig {
            start_offset: self.start_offset,
            resolution: self.resolution,
            last_frequency: self.frequency,
            next_frequency: self.hop_frequency,
            setup_delay,
            settle_timeout,
            stop_on_first_unlock: self.stop_on_first_unlock,
        })
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} must be a finite number of seconds >= 0, got {}",
            name, value
        )));
    }
    Duration::try_from_secs_f64(value).map_err(|e| {
        ConfigError::ValidationError(format!("{} of {} s is out of range: {}", name, value, e))
    })
}

/// Timed GPIO configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// GPIO bank name
    pub bank: String,
    /// Lines to drive (bit mask)
    pub line_mask: u32,
    /// Delay before the timed transition in seconds (0 = immediate)
    pub delay: f64,
    /// Time to hold after the transition before reading back, in seconds
    pub hold: f64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            bank: "FP0".to_string(),
            line_mask: 0xFF,
            delay: 0.0,
            hold: 1.0,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
    /// JSON structured logging
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log format '{}'",
                other
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Complete lotune configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LotuneConfig {
    /// Device configuration
    pub device: DeviceConfig,
    /// LO tuning benchmark configuration
    pub bench: BenchConfig,
    /// Timed GPIO configuration
    pub gpio: GpioConfig,
    /// Logging configuration
    pub logging: LogConfig,
}

impl LotuneConfig {
    /// Load configuration from the default search path.
    ///
    /// Search order:
    /// 1. `LOTUNE_CONFIG` environment variable
    /// 2. `./lotune.yaml`
    /// 3. `~/.config/lotune/config.yaml`
    /// 4. `/etc/lotune/config.yaml`
    ///
    /// Returns default config if no file is found. A path named by
    /// `LOTUNE_CONFIG` that does not exist is an error.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("LOTUNE_CONFIG") {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            return Self::load_from(&path);
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./lotune.yaml")];

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "lotune") {
            paths.push(config_dir.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/lotune/config.yaml"));

        paths
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bench
            .search_config()?
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.gpio.bank.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gpio bank must not be empty".to_string(),
            ));
        }
        if self.gpio.line_mask == 0 {
            return Err(ConfigError::ValidationError(
                "gpio line_mask selects no lines".to_string(),
            ));
        }
        if !(self.gpio.delay >= 0.0 && self.gpio.hold >= 0.0) {
            return Err(ConfigError::ValidationError(
                "gpio delay and hold must be >= 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            device: DeviceConfig {
                args: "type=b200".to_string(),
                antenna: Some("RX2".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        serde_yaml::to_string(&config).unwrap_or_default()
    }
}
