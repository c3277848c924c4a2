//! Configuration for the V2Ray exporter.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use v2ray_stats::{ApiFlavor, ConnectOptions};

/// Liveness route, always served without authentication.
pub const HEALTH_PATH: &str = "/health";

/// Readiness route, always served without authentication.
pub const READY_PATH: &str = "/ready";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Stats API connection settings.
    #[serde(default)]
    pub v2ray: V2rayConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Stats API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2rayConfig {
    /// `host:port` of the stats API (default: "127.0.0.1:8080").
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Timeout for every individual scrape, in seconds (default: 3).
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Timeout for the initial connection, in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Which proxy implementation serves the API.
    #[serde(default)]
    pub api: ApiFlavor,
}

fn default_endpoint() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_scrape_timeout() -> u64 {
    3
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for V2rayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            scrape_timeout_secs: default_scrape_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            api: ApiFlavor::default(),
        }
    }
}

impl V2rayConfig {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            api: self.api,
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9550").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the scrape endpoint (default: "/scrape").
    #[serde(default = "default_path")]
    pub path: String,

    /// Optional Basic Auth credentials for the scrape endpoint.
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:9550".to_string()
}

fn default_path() -> String {
    "/scrape".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            basic_auth: None,
        }
    }
}

impl HttpConfig {
    /// Parse the listen address. A bare `:PORT` binds all interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        };

        listen
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

/// Basic Auth credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.v2ray.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "v2ray endpoint must not be empty".to_string(),
            ));
        }

        if self.v2ray.scrape_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.v2ray.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }

        self.http.listen_addr()?;

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.http.path == HEALTH_PATH || self.http.path == READY_PATH {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.http.path
            )));
        }

        // The router would treat these as capture or wildcard segments.
        if self.http.path.contains([':', '*']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} must not contain ':' or '*'",
                self.http.path
            )));
        }

        if let Some(auth) = &self.http.basic_auth
            && (auth.username.is_empty() || auth.password.is_empty())
        {
            return Err(ConfigError::Validation(
                "basic_auth requires both username and password".to_string(),
            ));
        }

        Ok(())
    }
}
