// Logging module - Logging infrastructure
use crate::domain::error::{LinkError, LinkResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given level
pub fn default_directive(level: &str) -> String {
    format!("sensorlink={}", level)
}

/// Initialize logging system. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) -> LinkResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .map_err(|e| LinkError::Config {
            message: format!("Invalid log level '{}': {}", level, e),
        })?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| LinkError::Config {
            message: format!("Logging already initialized: {}", e),
        })?;

    tracing::debug!("SensorLink logging system initialized");
    Ok(())
}
