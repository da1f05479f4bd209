//! Error types for the lexdisk library.

use thiserror::Error;

/// Top-level error type for lexdisk operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors: open/read/write failures, mmap failures, short reads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An on-disk structure does not have the shape it should.
    #[error("corrupt index format: {0}")]
    CorruptFormat(String),

    /// Metadata values disagree with the declared schema.
    #[error("metadata schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An API was used in a way its contract forbids.
    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptFormat(msg.into())
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether this error means the on-disk index cannot be trusted.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptFormat(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type for lexdisk operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corrupt("postings.index has 7 bytes");
        assert!(err.to_string().contains("postings.index"));
        assert!(err.is_corrupt());

        let err = Error::config("unknown ranker id: foo");
        assert!(err.to_string().contains("foo"));
        assert!(!err.is_corrupt());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
