//! Error types for bundle-harvester
//!
//! Errors fall into a few classes that are handled very differently:
//! - transport failures (connection, protocol, non-success status) end a single task
//! - catalog decode failures end a single crawl branch (one entity or manifest)
//! - persistence failures are logged and reported, never fatal
//! - configuration errors abort startup

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bundle-harvester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bundle-harvester
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "scheduler.bundle_batch_size")
        key: Option<String>,
    },

    /// Configuration file could not be parsed as TOML
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection or protocol failure reported by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with a non-success status code
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Status code returned by the server
        status: u16,
        /// URL that produced the status
        url: String,
    },

    /// A bundle request succeeded but returned no content
    #[error("empty bundle body from {url}")]
    EmptyBundle {
        /// URL of the bundle
        url: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A content key string was not 64 hex characters
    #[error("invalid content key: {0}")]
    InvalidContentKey(String),

    /// Catalog walking failed
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Writing the cache snapshot failed
    #[error("failed to persist cache to {}: {source}", path.display())]
    Persist {
        /// Snapshot path that could not be written
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The run was cancelled before the operation could start
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors produced while reading the remote catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The snapshot index contained no descriptors
    #[error("snapshot index is empty")]
    EmptySnapshotIndex,

    /// A catalog body could not be decoded as the expected JSON shape
    #[error("failed to decode {url}: {source}")]
    Decode {
        /// URL of the body that failed to decode
        url: String,
        /// Decoder error
        source: serde_json::Error,
    },

    /// A catalog body was not valid UTF-8
    #[error("response from {url} is not valid UTF-8")]
    InvalidUtf8 {
        /// URL of the offending body
        url: String,
    },
}

impl Error {
    /// Shorthand for a configuration error pointing at a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// True for failures that originate from the network layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::HttpStatus { .. } | Error::EmptyBundle { .. }
        )
    }
}
