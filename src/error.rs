//! Error handling for the synsweep engine
//!
//! Only sweep-definition, configuration and privilege problems reach the
//! caller. Per-unit socket failures are folded into `PortState::Down` by the
//! probes and never abort sibling units.

use thiserror::Error;

/// Main error type for sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid sweep specification: {0}")]
    InvalidSpec(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    TaskError(String),
}

impl SweepError {
    /// True for errors that must stop a sweep before any unit is dispatched
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SweepError::PermissionDenied(_)
                | SweepError::InvalidSpec(_)
                | SweepError::InvalidTarget(_)
                | SweepError::ConfigError(_)
        )
    }

    /// Map a socket creation error, keeping permission failures distinct
    pub fn from_socket_error(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            SweepError::PermissionDenied(format!(
                "raw socket requires root or CAP_NET_RAW ({})",
                e
            ))
        } else {
            SweepError::NetworkError(e.to_string())
        }
    }
}

impl From<std::net::AddrParseError> for SweepError {
    fn from(e: std::net::AddrParseError) -> Self {
        SweepError::InvalidTarget(e.to_string())
    }
}

impl From<std::num::ParseIntError> for SweepError {
    fn from(e: std::num::ParseIntError) -> Self {
        SweepError::ParseError(e.to_string())
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(e: toml::de::Error) -> Self {
        SweepError::ConfigError(format!("Failed to parse TOML: {}", e))
    }
}

impl From<tokio::sync::AcquireError> for SweepError {
    fn from(e: tokio::sync::AcquireError) -> Self {
        SweepError::TaskError(e.to_string())
    }
}
