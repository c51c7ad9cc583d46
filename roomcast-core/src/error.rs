//! Error types for roomcast

use thiserror::Error;

/// The main error type for roomcast operations
#[derive(Error, Debug)]
pub enum Error {
    /// The bus itself is unavailable (closed, no route)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Identity resolution, registration, join or encryption bootstrap failed
    #[error("Identity error: {0}")]
    Identity(String),

    /// The remote endpoint rejected or failed the named operation
    #[error("Delivery error: {0} failed")]
    Delivery(String),

    /// No matching response arrived, or the response had an unknown shape
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for roomcast operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// True for the failures a producer should treat as "the request was
    /// answered, and the answer was no".
    pub fn is_delivery(&self) -> bool {
        matches!(self, Error::Delivery(_))
    }

    /// True when no usable response was correlated to the request.
    pub fn is_correlation(&self) -> bool {
        matches!(self, Error::Correlation(_))
    }
}
