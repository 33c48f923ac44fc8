//! Error types and handling for the Byte-Watt bridge
//!
//! This module defines the error taxonomy used throughout the bridge. The
//! poll loop and the settings synchronizer branch on it: transient errors are
//! retried with backoff, authentication rejections trigger one reauth,
//! validation errors never reach the network and data errors degrade single
//! metrics instead of failing a cycle.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Authentication rejected or login impossible
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Transport-level failures (connection refused, reset, 5xx)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Request exceeded its deadline
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Malformed payload or missing expected field
    #[error("Data error: {message}")]
    Data { message: String },

    /// Input rejected before any network call
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Vendor reported a non-retryable error code
    #[error("API error: {message}")]
    Api { message: String },

    /// A backoff sleep was cut short by a reconnect request
    #[error("Interrupted: {message}")]
    Interrupted { message: String },

    /// HTTP control API errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl BridgeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        BridgeError::Auth {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        BridgeError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        BridgeError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new data error
    pub fn data<S: Into<String>>(message: S) -> Self {
        BridgeError::Data {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        BridgeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        BridgeError::Api {
            message: message.into(),
        }
    }

    /// Create a new interrupted error
    pub fn interrupted<S: Into<String>>(message: S) -> Self {
        BridgeError::Interrupted {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        BridgeError::Web {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BridgeError::Io {
            message: message.into(),
        }
    }

    /// Whether the retry policy should try again after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Network { .. } | BridgeError::Timeout { .. }
        )
    }

    /// Whether this error means the vendor rejected our credentials or token
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth { .. })
    }

    /// Short stable name of the error class, used in health diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Config { .. } => "config",
            BridgeError::Auth { .. } => "auth",
            BridgeError::Network { .. } => "network",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Data { .. } => "data",
            BridgeError::Validation { .. } => "validation",
            BridgeError::Api { .. } => "api",
            BridgeError::Interrupted { .. } => "interrupted",
            BridgeError::Web { .. } => "web",
            BridgeError::Serialization { .. } => "serialization",
            BridgeError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::timeout(err.to_string())
        } else if err.is_decode() {
            BridgeError::data(err.to_string())
        } else {
            BridgeError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for BridgeError {
    fn from(err: chrono::ParseError) -> Self {
        BridgeError::validation("time", err.to_string())
    }
}
