use thiserror::Error;

/// SensorLink unified error type
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection timeout")]
    Timeout,

    #[error("Config store error: {message}")]
    Store { message: String },

    #[error("Record sink error: {message}")]
    Sink { message: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl LinkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Whether the error ends the current session
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::Serial(_)
                | LinkError::Io(_)
                | LinkError::Transport { .. }
                | LinkError::Timeout
        )
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
