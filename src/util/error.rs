//! Error types for the sfbx library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for FBX operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic bytes at start of file
    #[error("Invalid FBX file: expected Kaydara magic bytes")]
    InvalidMagic,

    /// ASCII file does not start with the version header comment
    #[error("Invalid FBX ASCII header: {0}")]
    InvalidAsciiHeader(String),

    /// File is truncated or corrupted
    #[error("Unexpected end of file at position {0}")]
    UnexpectedEof(u64),

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Unknown binary property type code
    #[error("Unknown property type code: {0:#04x} at position {1}")]
    UnknownPropertyType(u8, u64),

    /// ASCII parse failure
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create an ASCII parse error.
    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Self::Parse { line, message: msg.into() }
    }
}

/// Result type alias for FBX operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = Error::Parse { line: 12, message: "bad token".into() };
        assert!(e.to_string().contains("12"));
        assert!(e.to_string().contains("bad token"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
