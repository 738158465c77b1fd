//! WolfBucket Error Types

use std::io;

use thiserror::Error;

/// Result type alias for WolfBucket operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfBucket error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Object store errors
    #[error("Object store error: {0}")]
    Store(String),

    #[error("S3 error: {0}")]
    S3(#[from] s3::error::S3Error),

    // Filesystem errors
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error came from the object store transport
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_) | Error::S3(_))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            Error::NotFound(path) => io::Error::new(io::ErrorKind::NotFound, path),
            Error::InvalidPath(path) => io::Error::new(io::ErrorKind::InvalidInput, path),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
