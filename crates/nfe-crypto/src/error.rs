//! # Credential and Signature Errors

use nfe_core::{StoreError, ValidationError};
use thiserror::Error;

/// Failure to obtain a usable credential.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// The container's integrity check or decryption failed with the given
    /// password.
    #[error("credential container rejected the password")]
    BadPassword,

    /// The bytes are not a readable PKCS#12 container or certificate.
    #[error("malformed credential container: {0}")]
    Malformed(String),

    /// The container holds no certificate.
    #[error("credential container holds no certificate")]
    MissingCertificate,

    /// The container holds a certificate but no private key.
    #[error("credential container holds no private key")]
    MissingPrivateKey,

    /// The private key is not an RSA key.
    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),

    /// The container could not be fetched.
    #[error("credential container unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Failure to sign a document.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The input is malformed or the reference element is missing.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The RSA signing operation failed.
    #[error("RSA signing failed: {0}")]
    Signing(String),
}
