//! # Error Types
//!
//! Input errors and collaborator errors shared by every crate in the stack.
//!
//! ## Design
//!
//! - `ValidationError` is raised for programming or input mistakes. It is
//!   never defaulted away; callers fail fast.
//! - `StoreError` wraps failures of the storage collaborators so that the
//!   engine can tell "not found" apart from "backend broken".

use thiserror::Error;

/// Malformed or incomplete input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty or absent.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A field is present but violates its format or range.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Dotted path of the offending field (e.g. `items[2].cfop`).
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A 44-digit access key failed parsing or its check digit.
    #[error("invalid access key {key:?}: {reason}")]
    InvalidAccessKey {
        /// The rejected input.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No element carries an `Id` starting with the requested prefix.
    #[error("signature reference not found: no element with Id starting with {0:?}")]
    SignatureReferenceNotFound(String),

    /// The XML input could not be parsed or written.
    #[error("malformed XML: {0}")]
    MalformedXml(String),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidField`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend failed (I/O, connection, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
