//! Error types for value operations.

use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while working with values and keys.
#[derive(Debug, Error)]
pub enum ValueError {
    /// A value kind that cannot be used as a primary key.
    #[error("unsupported key type: {kind}")]
    UnsupportedKeyType {
        /// The offending value kind.
        kind: &'static str,
    },

    /// A record operation was attempted on a non-record value.
    #[error("value is not a record: {kind}")]
    NotARecord {
        /// The actual value kind.
        kind: &'static str,
    },

    /// A key path segment could not be resolved or assigned.
    #[error("invalid key path {path:?} at segment {segment:?}")]
    InvalidKeyPath {
        /// The full dotted path.
        path: String,
        /// The segment that failed.
        segment: String,
    },

    /// A compound key's arity does not match its key path.
    #[error("compound key arity mismatch: {paths} paths, {parts} key parts")]
    KeyArityMismatch {
        /// Number of paths in the key path.
        paths: usize,
        /// Number of parts in the key value.
        parts: usize,
    },
}

impl ValueError {
    /// Creates an unsupported key type error.
    pub fn unsupported_key(kind: &'static str) -> Self {
        Self::UnsupportedKeyType { kind }
    }

    /// Creates a not-a-record error.
    pub fn not_a_record(kind: &'static str) -> Self {
        Self::NotARecord { kind }
    }

    /// Creates an invalid key path error.
    pub fn invalid_key_path(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Self::InvalidKeyPath {
            path: path.into(),
            segment: segment.into(),
        }
    }
}
