//! Error types for strata
//!
//! Provides a unified error type for the block store, the varchar allocator
//! and the B+Tree.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Persistent Metadata Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt metadata: {0}")]
    CorruptMeta(String),

    #[error("Control block checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Corruption { stored: u32, computed: u32 },

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Access Errors
    // -------------------------------------------------------------------------
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Invalid handle {offset}: {reason}")]
    InvalidHandle { offset: u64, reason: String },

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Too large: {size} bytes exceeds the limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    // -------------------------------------------------------------------------
    // Tree Errors
    // -------------------------------------------------------------------------
    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    #[error("Key not found")]
    NotFound,
}

impl StrataError {
    pub(crate) fn invalid_handle(offset: u64, reason: impl Into<String>) -> Self {
        StrataError::InvalidHandle {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}
