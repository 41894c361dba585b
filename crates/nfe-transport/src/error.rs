//! # Transport Error Types

use thiserror::Error;

/// Failure to complete a round trip with the authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the configured timeout.
    #[error("authority did not answer within {elapsed_ms} ms")]
    Timeout {
        /// The timeout that elapsed.
        elapsed_ms: u64,
    },

    /// Connection-level failure (DNS, refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The TLS handshake failed (client certificate refused, protocol).
    #[error("TLS error: {0}")]
    Tls(String),

    /// The HTTP client could not be built from the credential.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The endpoint URL is invalid.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network(_))
    }
}

/// The authority answered with something that is not a usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// The body is not well-formed XML.
    #[error("malformed authority response: {0}")]
    Malformed(String),

    /// A required element is absent.
    #[error("authority response has no {0}")]
    MissingField(&'static str),
}
