//! Tracing setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .map_err(|e| ConfigError::Validation(format!("Invalid log level: {}", e)))?;

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation(format!("Failed to initialize tracing: {}", e)))
}

/// Directives for our crates at `level`, keeping transport internals quiet.
fn default_directives(level: &str) -> String {
    format!(
        "v2ray_exporter={level},v2ray_stats={level},h2=warn,hyper=warn,tower=warn,warn",
        level = level
    )
}
