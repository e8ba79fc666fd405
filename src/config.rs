//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; missing values take the defaults
//! below, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::battery::alerts::{Band, Thresholds};
use crate::battery::PackLayout;
use crate::control::OperatingMode;
use crate::error::{BmsError, Result};
use crate::serial::discovery::{FixedPort, PlatformDiscovery, PortDiscovery};

/// Baud rates offered by the BMS controller firmware
pub const SUPPORTED_BAUD_RATES: &[u32] = &[300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub pack: PackConfig,
    pub ingestion: IngestionConfig,
    pub command: CommandConfig,
    pub telemetry: TelemetryConfig,
    pub alerts: AlertConfig,
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means discover by platform naming rules
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Reader back-off after an I/O error
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Pack topology
#[derive(Debug, Deserialize, Clone)]
pub struct PackConfig {
    #[serde(default = "default_segments")]
    pub segments: usize,

    #[serde(default = "default_devices_per_segment")]
    pub devices_per_segment: usize,

    #[serde(default = "default_cells_per_device")]
    pub cells_per_device: usize,
}

/// Ingestion loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hold an unterminated tail until its newline arrives
    #[serde(default)]
    pub carry_partial_lines: bool,
}

/// Command dispatch configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Mode sent once the link is up
    #[serde(default)]
    pub initial_mode: OperatingMode,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Alert thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    #[serde(default = "default_cell_voltage_min_mv")]
    pub cell_voltage_min_mv: f64,

    #[serde(default = "default_cell_voltage_max_mv")]
    pub cell_voltage_max_mv: f64,

    #[serde(default = "default_pack_voltage_min_v")]
    pub pack_voltage_min_v: f64,

    #[serde(default = "default_pack_voltage_max_v")]
    pub pack_voltage_max_v: f64,

    #[serde(default = "default_temperature_min")]
    pub temperature_min: f64,

    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Also write daily-rotated log files here
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

// Default value functions
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 100 }

fn default_segments() -> usize { 8 }
fn default_devices_per_segment() -> usize { 3 }
fn default_cells_per_device() -> usize { 6 }

fn default_poll_interval_ms() -> u64 { 100 }

fn default_max_retries() -> u32 { 10 }
fn default_retry_delay_ms() -> u64 { 100 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_cell_voltage_min_mv() -> f64 { 3000.0 }
fn default_cell_voltage_max_mv() -> f64 { 4200.0 }
fn default_pack_voltage_min_v() -> f64 { 426.0 }
fn default_pack_voltage_max_v() -> f64 { 596.4 }
fn default_temperature_min() -> f64 { 0.0 }
fn default_temperature_max() -> f64 { 60.0 }

fn default_report_interval_ms() -> u64 { 1000 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            segments: default_segments(),
            devices_per_segment: default_devices_per_segment(),
            cells_per_device: default_cells_per_device(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            carry_partial_lines: false,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            initial_mode: OperatingMode::default(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            format: default_log_format(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cell_voltage_min_mv: default_cell_voltage_min_mv(),
            cell_voltage_max_mv: default_cell_voltage_max_mv(),
            pack_voltage_min_v: default_pack_voltage_min_v(),
            pack_voltage_max_v: default_pack_voltage_max_v(),
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl SerialConfig {
    /// Port candidates: the configured path, or platform discovery when empty
    pub fn discovery(&self) -> Box<dyn PortDiscovery> {
        if self.port.is_empty() {
            Box::new(PlatformDiscovery::default())
        } else {
            Box::new(FixedPort(self.port.clone()))
        }
    }
}

impl PackConfig {
    pub fn layout(&self) -> PackLayout {
        PackLayout {
            segments: self.segments,
            devices_per_segment: self.devices_per_segment,
            cells_per_device: self.cells_per_device,
        }
    }
}

impl IngestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AlertConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            cell_voltage: Band::new(self.cell_voltage_min_mv, self.cell_voltage_max_mv),
            pack_voltage: Band::new(self.pack_voltage_min_v, self.pack_voltage_max_v),
            temperature: Band::new(self.temperature_min, self.temperature_max),
        }
    }
}

impl LoggingConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

fn invalid(message: impl std::fmt::Display) -> BmsError {
    BmsError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bms_monitor::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial
        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        // Pack topology
        for (name, value) in [
            ("segments", self.pack.segments),
            ("devices_per_segment", self.pack.devices_per_segment),
            ("cells_per_device", self.pack.cells_per_device),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        // Ingestion
        if self.ingestion.poll_interval_ms == 0 || self.ingestion.poll_interval_ms > 10000 {
            return Err(invalid("poll_interval_ms must be between 1 and 10000"));
        }

        // Commands
        if self.command.max_retries == 0 || self.command.max_retries > 100 {
            return Err(invalid("max_retries must be between 1 and 100"));
        }

        if self.command.retry_delay_ms > 10000 {
            return Err(invalid("retry_delay_ms must be between 0 and 10000"));
        }

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        // Alert bands
        let alerts = &self.alerts;
        for (name, min, max) in [
            ("cell_voltage", alerts.cell_voltage_min_mv, alerts.cell_voltage_max_mv),
            ("pack_voltage", alerts.pack_voltage_min_v, alerts.pack_voltage_max_v),
            ("temperature", alerts.temperature_min, alerts.temperature_max),
        ] {
            if !min.is_finite() || !max.is_finite() || min >= max {
                return Err(invalid(format!("{} minimum must be less than its maximum", name)));
            }
        }

        // Logging
        if self.logging.report_interval_ms == 0 {
            return Err(invalid("report_interval_ms must be greater than 0"));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}
