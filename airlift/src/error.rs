//! Error types for the update engine

use std::path::PathBuf;

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Comprehensive error type for update operations
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A path passed to the matcher used backslash separators
    #[error("not uniform separator style: '{path}'")]
    SeparatorStyle { path: String },

    /// A glob or regex rule failed to compile
    #[error("invalid match pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Directory listing errors during diffing
    #[error("directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// Hash computation errors
    #[error("hash computation error for '{path}': {message}")]
    Hash { path: PathBuf, message: String },

    /// The remote end refused the connection
    #[error("connection refused at {url}: {message}")]
    ConnectionRefused { url: String, message: String },

    /// The connection dropped mid-transfer
    #[error("connection interrupted at {url}: {message}")]
    ConnectionInterrupted { url: String, message: String },

    /// No data arrived within the configured read timeout
    #[error("connection timed out at {url}: {message}")]
    ConnectionTimeout { url: String, message: String },

    /// A non-success HTTP status, with a truncated body snippet for diagnostics
    #[error("http status {code} from {url}")]
    HttpStatus {
        code: u16,
        url: String,
        body: Option<String>,
    },

    /// Malformed manifest or structure data; never retried
    #[error("unable to decode {what}: {message}")]
    Decode { what: String, message: String },

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal failures (panicked workers, join errors)
    #[error("internal error: {0}")]
    Internal(String),

    /// Cancellation error
    #[error("operation was cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new hash error
    pub fn hash_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Hash {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new pattern error
    pub fn pattern_error(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode_error(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Failure classes that move a download on to the next mirror URL.
    ///
    /// Protocol errors (bad HTTP status) fall back exactly like transport
    /// failures; everything else aborts the file immediately.
    pub fn is_fallback_worthy(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectionInterrupted { .. }
                | Self::ConnectionTimeout { .. }
                | Self::HttpStatus { .. }
        )
    }

    /// Failure classes worth another attempt against the same URL.
    pub fn is_retryable(&self) -> bool {
        self.is_fallback_worthy()
    }

    /// Map a reqwest failure onto the transport error taxonomy.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionRefused {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            Self::ConnectionTimeout {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::ConnectionInterrupted {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}
