//! Crate-level error type and `Result` alias.
//! Configuration errors are fatal and never retried; warp errors carry a
//! transient flag consumed by the retry loop in `core::engine`; missing
//! source data is a tile status, not an error.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid formula `{formula}`: {reason}")]
    Formula { formula: String, reason: String },

    #[error("Warp failed (transient={transient}): {message}")]
    Warp { message: String, transient: bool },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Secret `{id}` unavailable: {reason}")]
    Secret { id: String, reason: String },

    #[error("Processing error: {0}")]
    Processing(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn storage<E: std::fmt::Display>(e: E) -> Self {
        Error::Storage(e.to_string())
    }

    /// True for errors the engine may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Warp { transient: true, .. })
    }
}
