//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field carries a default, so an empty file (or no file at
//! all, via [`Config::default`]) yields a usable configuration.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaptureError, Result};

/// Baud rates offered by the MESC console
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout, doubles as the state machine tick
    #[serde(default = "default_read_tick_ms")]
    pub read_tick_ms: u64,
}

/// Capture timing and malformation budgets
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_malformed_rows")]
    pub max_malformed_rows: u32,

    #[serde(default = "default_max_consecutive_bad_records")]
    pub max_consecutive_bad_records: u32,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Log stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_stream_capacity")]
    pub capacity: usize,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

/// Export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

/// File logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub file_dir: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_tick_ms() -> u64 { 100 }

fn default_response_timeout_ms() -> u64 { 2000 }
fn default_idle_timeout_ms() -> u64 { 2000 }
fn default_max_malformed_rows() -> u32 { 5 }
fn default_max_consecutive_bad_records() -> u32 { 20 }
fn default_max_line_length() -> usize { 4096 }

fn default_stream_capacity() -> usize { 1000 }
fn default_interval_ms() -> u64 { 100 }
fn default_channels() -> Vec<String> { vec!["vbus".to_string(), "Iu_avg".to_string()] }

fn default_export_dir() -> PathBuf { PathBuf::from("./captures") }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_tick_ms: default_read_tick_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_malformed_rows: default_max_malformed_rows(),
            max_consecutive_bad_records: default_max_consecutive_bad_records(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: default_stream_capacity(),
            interval_ms: default_interval_ms(),
            channels: default_channels(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { dir: default_export_dir() }
    }
}

impl CaptureConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl SerialConfig {
    pub fn read_tick(&self) -> Duration {
        Duration::from_millis(self.read_tick_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> CaptureError {
    CaptureError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
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
    /// use mesc_capture::config::Config;
    ///
    /// let config = Config::load("config/mesc.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
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
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
            )));
        }

        if self.serial.read_tick_ms == 0 || self.serial.read_tick_ms > 10000 {
            return Err(invalid("read_tick_ms must be between 1 and 10000"));
        }

        // Timing fields
        if self.capture.response_timeout_ms == 0 || self.capture.response_timeout_ms > 60000 {
            return Err(invalid("response_timeout_ms must be between 1 and 60000"));
        }

        if self.capture.idle_timeout_ms == 0 || self.capture.idle_timeout_ms > 60000 {
            return Err(invalid("idle_timeout_ms must be between 1 and 60000"));
        }

        // The tick must be able to observe the idle window
        if self.serial.read_tick_ms > self.capture.idle_timeout_ms {
            return Err(invalid("read_tick_ms must not exceed idle_timeout_ms"));
        }

        if self.capture.max_consecutive_bad_records == 0 {
            return Err(invalid("max_consecutive_bad_records must be greater than 0"));
        }

        if self.capture.max_line_length < 64 {
            return Err(invalid("max_line_length must be at least 64"));
        }

        if self.stream.capacity == 0 {
            return Err(invalid("stream capacity must be greater than 0"));
        }

        if self.stream.interval_ms == 0 || self.stream.interval_ms > 60000 {
            return Err(invalid("interval_ms must be between 1 and 60000"));
        }

        for channel in &self.stream.channels {
            if !is_valid_channel_name(channel) {
                return Err(invalid(format!("invalid stream channel name '{}'", channel)));
            }
        }

        if self.export.dir.as_os_str().is_empty() {
            return Err(invalid("export dir cannot be empty"));
        }

        Ok(())
    }
}

/// Channel names go on the wire as `log -a <name>`, so no whitespace or separators
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 921600

[capture]
idle_timeout_ms = 1500

[stream]
channels = ["vbus", "Iu_avg", "ehz"]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 921600);
        assert_eq!(config.capture.idle_timeout_ms, 1500);
        assert_eq!(config.capture.max_malformed_rows, 5);
        assert_eq!(config.stream.channels.len(), 3);
        assert_eq!(config.stream.capacity, 1000);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.export.dir, PathBuf::from("./captures"));
        assert!(config.logging.file_dir.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/mesc.toml");
        assert!(matches!(result, Err(CaptureError::Io(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml("[serial\nport = ");
        assert!(matches!(result, Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = Config::default();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in SUPPORTED_BAUD_RATES {
            let mut config = Config::default();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_read_tick_zero() {
        let mut config = Config::default();
        config.serial.read_tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_tick_longer_than_idle_timeout() {
        let mut config = Config::default();
        config.serial.read_tick_ms = 3000;
        config.capture.idle_timeout_ms = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_timeout_zero() {
        let mut config = Config::default();
        config.capture.idle_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_timeout_too_high() {
        let mut config = Config::default();
        config.capture.response_timeout_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_malformed_rows_allowed() {
        let mut config = Config::default();
        config.capture.max_malformed_rows = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consecutive_bad_records_zero() {
        let mut config = Config::default();
        config.capture.max_consecutive_bad_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_capacity_zero() {
        let mut config = Config::default();
        config.stream.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_too_high() {
        let mut config = Config::default();
        config.stream.interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_name_with_space_rejected() {
        let mut config = Config::default();
        config.stream.channels = vec!["vbus".to_string(), "bad name".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_name_rules() {
        assert!(is_valid_channel_name("Iu_avg"));
        assert!(is_valid_channel_name("motor.speed"));
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("a;b"));
        assert!(!is_valid_channel_name("-r"));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_serial_port(), "/dev/ttyACM0");
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_read_tick_ms(), 100);
        assert_eq!(default_response_timeout_ms(), 2000);
        assert_eq!(default_idle_timeout_ms(), 2000);
        assert_eq!(default_max_malformed_rows(), 5);
        assert_eq!(default_max_consecutive_bad_records(), 20);
        assert_eq!(default_max_line_length(), 4096);
        assert_eq!(default_stream_capacity(), 1000);
        assert_eq!(default_interval_ms(), 100);
        assert_eq!(default_channels(), vec!["vbus", "Iu_avg"]);
    }
}
