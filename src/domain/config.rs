use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// SensorLink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialSettings,
    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Transport handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Size of a single transport read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// How transport reads are cut into messages
    #[serde(default)]
    pub framing: FramingMode,
    /// Longest partial line kept in line framing
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Inbound message framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Every transport read is one message
    #[default]
    Chunk,
    /// Messages are terminated by a newline and may span reads
    Line,
}

/// Serial line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
    /// Poll interval of the blocking port reader
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    #[default]
    None,
    Hardware,
    Software,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Channel configuration file; defaults to the user data directory
    #[serde(default)]
    pub channel_store: Option<PathBuf>,
    /// CSV file receiving tagged readings
    #[serde(default)]
    pub record_path: Option<PathBuf>,
    /// First field of every record
    #[serde(default)]
    pub context_tag: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_max_line_length() -> usize {
    4096
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout() -> u64 {
    100
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            connect_timeout_ms: default_connect_timeout(),
            read_buffer_size: default_read_buffer_size(),
            framing: FramingMode::default(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::default(),
            flow_control: FlowControlConfig::default(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl GlobalConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl StorageConfig {
    /// Channel store path, falling back to the platform data directory
    pub fn channel_store_path(&self) -> Option<PathBuf> {
        self.channel_store.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join("sensorlink").join("channels.toml"))
        })
    }
}
