use std::time::Duration;

use thiserror::Error;

/// Errors returned by the stats client.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Invalid stats endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Failed to connect to stats endpoint {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Stats call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stats service not ready: {0}")]
    Unavailable(String),

    #[error("Stats RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl StatsError {
    /// Short, stable name of the error kind, suitable as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            StatsError::InvalidEndpoint { .. } => "invalid_endpoint",
            StatsError::Connection { .. } => "connection",
            StatsError::Timeout(_) => "timeout",
            StatsError::Unavailable(_) | StatsError::Rpc(_) => "rpc",
        }
    }
}

/// Result type alias using the stats error.
pub type Result<T> = std::result::Result<T, StatsError>;
