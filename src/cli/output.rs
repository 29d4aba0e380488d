use crate::cli::args::OutputFormat;
use crate::domain::channel::{Channel, ChannelSet, Device};
use crate::domain::config::LinkConfig;
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_devices(&self, devices: &[Device]) -> Result<(), OutputError>;
    fn write_channels(&self, device: &str, channels: &ChannelSet) -> Result<(), OutputError>;
    fn write_record(&self, fields: &[String]) -> Result<(), OutputError>;
    fn write_config(&self, config: &LinkConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::LinkError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_devices(&self, devices: &[Device]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if devices.is_empty() {
                    println!("No serial ports found");
                }
                for device in devices {
                    println!("{}  {}", device.address, device.name);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(devices)?);
            }
            OutputFormat::Table => {
                let rows: Vec<DeviceTableRow> = devices.iter().map(DeviceTableRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        Ok(())
    }

    fn write_channels(&self, device: &str, channels: &ChannelSet) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Channels of {}:", device);
                if channels.is_empty() {
                    println!("  (none stored)");
                }
                for channel in channels.iter() {
                    println!("  {}", channel);
                }
            }
            OutputFormat::Json => {
                let rows: Vec<ChannelJson> = channels.iter().map(ChannelJson::from).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Table => {
                let rows: Vec<ChannelTableRow> =
                    channels.iter().map(ChannelTableRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        Ok(())
    }

    fn write_record(&self, fields: &[String]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(fields)?),
            OutputFormat::Text | OutputFormat::Table => println!("{}", fields.join(" | ")),
        }
        Ok(())
    }

    fn write_config(&self, config: &LinkConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text | OutputFormat::Table => {
                print!("{}", toml::to_string_pretty(config)?)
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "message": message });
                println!("{}", output);
            }
            OutputFormat::Text | OutputFormat::Table => println!("{}", message),
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "error": error });
                eprintln!("{}", output);
            }
            OutputFormat::Text | OutputFormat::Table => eprintln!("Error: {}", error),
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct DeviceTableRow {
    #[tabled(rename = "Port")]
    address: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&Device> for DeviceTableRow {
    fn from(device: &Device) -> Self {
        Self {
            address: device.address.clone(),
            name: device.name.clone(),
        }
    }
}

#[derive(Tabled)]
struct ChannelTableRow {
    #[tabled(rename = "Channel")]
    id: u32,
    #[tabled(rename = "Min")]
    min: i32,
    #[tabled(rename = "Max")]
    max: i32,
    #[tabled(rename = "D")]
    d: i32,
    #[tabled(rename = "Value")]
    value: String,
}

impl From<&Channel> for ChannelTableRow {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id,
            min: channel.min,
            max: channel.max,
            d: channel.d,
            value: channel.value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Channel as printed in JSON, live value included
#[derive(serde::Serialize)]
struct ChannelJson {
    id: u32,
    min: i32,
    max: i32,
    d: i32,
    value: Option<i32>,
}

impl From<&Channel> for ChannelJson {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id,
            min: channel.min,
            max: channel.max,
            d: channel.d,
            value: channel.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_row_marks_missing_value() {
        let row = ChannelTableRow::from(&Channel::reported(2, 9));
        assert_eq!(row.value, "-");
        assert_eq!(row.max, 20000);

        let row = ChannelTableRow::from(&Channel::reported(2, 9).with_value(40));
        assert_eq!(row.value, "40");
    }

    #[test]
    fn test_channel_json_keeps_value() {
        let channel = Channel::new(1, 0, 5, 2).with_value(3);
        let json = serde_json::to_string(&ChannelJson::from(&channel)).unwrap();
        assert_eq!(json, r#"{"id":1,"min":0,"max":5,"d":2,"value":3}"#);
    }

    #[test]
    fn test_output_error_converts() {
        let err: crate::domain::error::LinkError =
            OutputError::IoError(io::Error::new(io::ErrorKind::Other, "closed")).into();
        assert!(err.to_string().contains("closed"));
    }
}
