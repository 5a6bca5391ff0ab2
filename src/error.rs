//! Error types for ZIM archive access.

use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ZimError>;

/// Errors raised while reading, decoding or searching a ZIM archive.
#[derive(Error, Debug, Clone)]
pub enum ZimError {
    /// I/O failure reading an underlying file or part
    #[error("Failed to read source: {0}")]
    SourceRead(String),

    /// A storage backend has no file under the requested name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request beyond the known parts or entries
    #[error("Read of {length} bytes at offset {offset} is out of range (size {size})")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    /// Codec-level failure, carries the decoder's own message
    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Unsupported cluster compression: {0}")]
    UnsupportedCompression(u8),

    /// Malformed header field or table layout
    #[error("Invalid ZIM header: {0}")]
    InvalidHeader(String),

    /// Malformed index pointer, directory entry or out-of-bounds cluster/blob index
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Redirect chain from '{path}' exceeds {hops} hops")]
    RedirectLoop { path: String, hops: usize },

    #[error("Invalid search expression: {0}")]
    SearchRegex(#[from] regex::Error),

    #[error("Archive is not ready")]
    ArchiveNotReady,

    #[error("Full-text engine error: {0}")]
    FullText(String),
}

impl From<std::io::Error> for ZimError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ZimError::NotFound(err.to_string()),
            _ => ZimError::SourceRead(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ZimError {
    fn from(err: reqwest::Error) -> Self {
        ZimError::SourceRead(err.to_string())
    }
}

impl ZimError {
    /// Whether this error means "nothing there" rather than a real failure.
    ///
    /// Split-part discovery stops on these.
    pub fn is_missing(&self) -> bool {
        matches!(self, ZimError::NotFound(_) | ZimError::OutOfRange { .. })
    }
}
