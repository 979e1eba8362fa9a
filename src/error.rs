//! Error types for the proxy.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced outside a session: binding, configuration, accept failures.
///
/// Failures inside a session never leave it; they move that session to
/// `Closing` and are only logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Listen address could not be parsed
    #[error("invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
