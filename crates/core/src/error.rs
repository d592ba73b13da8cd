//! Error types for linewire-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown host {host}: {source}")]
    UnknownHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Certificate parse error: {0}")]
    CertParseError(String),
}

impl CoreError {
    /// Socket, handshake or write failure surfaced by a synchronous call
    pub fn is_transport(&self) -> bool {
        matches!(self, CoreError::Io(_) | CoreError::Tls(_))
    }

    /// Operation attempted in the wrong connection state
    pub fn is_connection_state(&self) -> bool {
        matches!(self, CoreError::NotConnected | CoreError::AlreadyConnected)
    }

    /// Invalid construction input (host, port, TLS settings)
    pub fn is_configuration(&self) -> bool {
        matches!(self, CoreError::Configuration(_) | CoreError::CertParseError(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;
