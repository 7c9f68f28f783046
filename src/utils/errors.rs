//! Error types and handling for the magnet node.
//!
//! Library code returns [`Result`] internally. The protocol engine is the
//! boundary where every error is turned into a wire [`Status`] so that a
//! failed probe never takes down a discovery pass.
//!
//! [`Status`]: crate::transport::Status

use thiserror::Error;

/// Result type alias for the magnet library
pub type Result<T> = std::result::Result<T, MagnetError>;

/// Top-level error type for all magnet operations
#[derive(Error, Debug, Clone)]
pub enum MagnetError {
    /// Network and transport layer errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration and I/O errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Protocol-level errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// UTF-8 conversion errors
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Generic error for unexpected conditions
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Network and transport layer errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// The peer actively refused the connection
    #[error("Connection refused by {peer}")]
    ConnectionRefused { peer: String },

    /// Connection establishment failure other than a refusal
    #[error("Connection failed to {peer}: {reason}")]
    ConnectionFailed { peer: String, reason: String },

    /// Write or flush on an open connection failed
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Timeout during network operation
    #[error("Network timeout: {operation}")]
    Timeout { operation: String },

    /// Invalid network address
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// Interface missing or without an IPv4 binding
    #[error("Interface {interface} unavailable: {reason}")]
    InterfaceUnavailable { interface: String, reason: String },

    /// Peer not present in the host registry
    #[error("Peer not found: {hostname}")]
    PeerNotFound { hostname: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Protocol-level errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Method name outside the closed method set
    #[error("Unsupported method: {method}")]
    UnsupportedMethod { method: String },

    /// Invalid message format
    #[error("Invalid message format: {reason}")]
    InvalidMessage { reason: String },

    /// Peer closed the stream or sent nothing
    #[error("Empty response")]
    EmptyResponse,

    /// Header option key that is not part of the header
    #[error("Unknown header field: {field}")]
    UnknownField { field: String },
}

impl MagnetError {
    /// Creates a new unexpected error with a custom message
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Returns true if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(NetworkError::Timeout { .. })
                | Self::Network(NetworkError::ConnectionFailed { .. })
                | Self::Network(NetworkError::ConnectionRefused { .. })
                | Self::Network(NetworkError::Transport { .. })
        )
    }
}

impl From<std::io::Error> for MagnetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MagnetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for MagnetError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Utf8(err.utf8_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MagnetError::Protocol(ProtocolError::UnsupportedMethod {
            method: "DELETE".to_string(),
        });
        assert!(error.to_string().contains("DELETE"));
    }

    #[test]
    fn test_error_recovery() {
        let timeout_error = MagnetError::Network(NetworkError::Timeout {
            operation: "connect".to_string(),
        });
        assert!(timeout_error.is_recoverable());

        let decode_error = MagnetError::Protocol(ProtocolError::EmptyResponse);
        assert!(!decode_error.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error: MagnetError = io.into();
        assert!(matches!(error, MagnetError::Io(ref msg) if msg.contains("reset")));
    }
}
