use crate::domain::config::{FlowControlConfig, ParityConfig, SerialSettings};
use crate::domain::channel::ChannelId;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for SensorLink
#[derive(Parser, Debug)]
#[command(
    name = "sensorlink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial link to calibrated multi-channel sensor devices",
    long_about = "Connects to a sensor device over a serial line, keeps its per-channel calibration in a local store and records streamed readings."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Connect, request the configuration and stream readings until Ctrl-C
    Monitor(MonitorArgs),
    /// Store a channel's calibration and push a changed `d` to the device
    SetChannel(SetChannelArgs),
    /// Ask the device to switch its baud rate
    Baud(BaudArgs),
    /// Show the stored channels of a device
    Channels {
        /// Device address (serial port path)
        device: String,
    },
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Serial connection arguments
#[derive(ClapArgs, Debug, Clone)]
pub struct PortArgs {
    /// Serial port path
    #[arg(short, long)]
    pub port: String,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Stop bits
    #[arg(long)]
    pub stop_bits: Option<u8>,

    /// Parity (none, even, odd)
    #[arg(long, value_enum)]
    pub parity: Option<ParityArg>,

    /// Flow control (none, software, hardware)
    #[arg(long, value_enum)]
    pub flow_control: Option<FlowControlArg>,
}

impl PortArgs {
    /// Configured settings with command line overrides applied
    pub fn apply(&self, base: &SerialSettings) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud.unwrap_or(base.baud_rate),
            data_bits: self.data_bits.unwrap_or(base.data_bits),
            stop_bits: self.stop_bits.unwrap_or(base.stop_bits),
            parity: self.parity.map(Into::into).unwrap_or(base.parity),
            flow_control: self.flow_control.map(Into::into).unwrap_or(base.flow_control),
            read_timeout_ms: base.read_timeout_ms,
        }
    }
}

/// Monitor arguments
#[derive(ClapArgs, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub port: PortArgs,

    /// First field of every recorded row
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Append readings to this CSV file
    #[arg(short, long)]
    pub record: Option<PathBuf>,

    /// Assemble newline-terminated messages instead of one message per read
    #[arg(long)]
    pub line_framing: bool,
}

/// Channel configuration arguments
#[derive(ClapArgs, Debug)]
pub struct SetChannelArgs {
    #[command(flatten)]
    pub port: PortArgs,

    /// Channel id
    pub channel: ChannelId,

    /// Lower calibration bound
    #[arg(long)]
    pub min: Option<i32>,

    /// Upper calibration bound
    #[arg(long)]
    pub max: Option<i32>,

    /// Calibration parameter
    #[arg(short, long)]
    pub d: Option<i32>,

    /// Seconds to wait for the device's configuration report
    #[arg(long, default_value = "5")]
    pub wait: u64,
}

/// Baud rate arguments
#[derive(ClapArgs, Debug)]
pub struct BaudArgs {
    #[command(flatten)]
    pub port: PortArgs,

    /// New baud rate
    pub rate: u32,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Initialize project configuration
    Init {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
}

/// Parity argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

/// Flow control argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowControlArg {
    None,
    Software,
    Hardware,
}

impl From<ParityArg> for ParityConfig {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => ParityConfig::None,
            ParityArg::Even => ParityConfig::Even,
            ParityArg::Odd => ParityConfig::Odd,
        }
    }
}

impl From<FlowControlArg> for FlowControlConfig {
    fn from(arg: FlowControlArg) -> Self {
        match arg {
            FlowControlArg::None => FlowControlConfig::None,
            FlowControlArg::Software => FlowControlConfig::Software,
            FlowControlArg::Hardware => FlowControlConfig::Hardware,
        }
    }
}
