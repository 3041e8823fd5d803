//! Error types for the offline-cache library.

use thiserror::Error;

/// Errors that can occur while driving the asset cache.
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest asset could not be fetched, so the whole install failed.
    #[error("Install failed at {url}: {reason}")]
    Install {
        /// Resolved URL of the asset that failed.
        url: String,
        /// Why the fetch was rejected.
        reason: String,
    },

    /// The network layer could not produce a response.
    #[error("Network error for {url}: {reason}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lifecycle step was requested out of order.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// No store exists under this identifier.
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    /// A stored entry is unreadable.
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error during store operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry metadata (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for a [`Error::Network`] failure.
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized `Result` type for offline-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
