//! # Engine Error Types
//!
//! Only failures that make an operation meaningless are errors here. An
//! authority rejection, a pending batch, or an unreachable authority during
//! transmission is a [`crate::TransmissionResult`], not an `Err`.

use nfe_core::{StoreError, ValidationError};
use nfe_crypto::{CertificateError, SignatureError};
use nfe_transport::{ResponseError, TransportError};
use thiserror::Error;

/// Transmission could not be attempted or completed locally.
#[derive(Error, Debug)]
pub enum TransmissionError {
    /// The document or access key is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The tenant's credential could not be loaded.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The document could not be signed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// A collaborator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A round trip outside the transmission path failed (status queries).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authority's answer could not be read (status queries).
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// A distribution sync call failed. The cursor is unchanged.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The authority rejected the request schema (`cStat` 215).
    #[error("distribution request rejected by schema validation: {reason}")]
    SchemaRejected { reason: String },

    /// Any other non-success `cStat`.
    #[error("authority answered {code}: {reason}")]
    Authority { code: u16, reason: String },

    /// The round trip failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The answer could not be parsed.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The tenant's credential could not be loaded.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// A collaborator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether repeating the call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Response(_) => true,
            Self::Authority { code, .. } => matches!(code, 108 | 109 | 656),
            _ => false,
        }
    }
}
