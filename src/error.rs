//! Error types for the Gatekeeper service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Gatekeeper startup and administration paths.
///
/// The throttling decisions themselves never return this type; backend
/// failures are absorbed by falling back to the local store.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Invalid rule or settings content
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings could not be read or deserialized
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
