//! Error types for Ember Core.

use thiserror::Error;

/// Result type alias for Ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Errors that can occur in Ember operations.
#[derive(Error, Debug)]
pub enum EmberError {
    /// A tokenizer method was called before loading finished.
    #[error("tokenizer not initialized: call load() first")]
    NotInitialized,

    /// The tokenizer source is structurally invalid.
    #[error("malformed tokenizer: {0}")]
    MalformedTokenizer(String),

    /// The remote resource does not exist.
    #[error("not found: {url} (the model is probably not downloaded or deployed)")]
    NotFound {
        /// Requested URL.
        url: String,
    },

    /// Any other failure while fetching a remote resource.
    #[error("fetch failed for {url}: {message}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Transport or HTTP error description.
        message: String,
    },

    /// Invalid pattern in a split or replace rule.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] fancy_regex::Error),

    /// Shape mismatch error.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Cache operation error.
    #[error("cache error: {0}")]
    CacheError(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}
