//! # nfe-crypto — Credentials and XML Signatures
//!
//! - **Credential parsing.** [`Credential::parse()`] opens a
//!   password-protected PKCS#12 container and yields the leaf certificate,
//!   its RSA private key and [`CertificateMetadata`].
//! - **Credential cache.** [`CredentialCache`] holds one parsed credential
//!   per tenant, loads it single-flight from the [`BlobStore`], and is
//!   invalidated explicitly after a re-upload.
//! - **Signature engine.** [`xmldsig::sign()`] produces an enveloped
//!   RSA-SHA256 XML signature over the element whose `Id` carries a given
//!   prefix; [`xmldsig::verify()`] recomputes its digest.
//!
//! ## Security Invariant
//!
//! Key material never leaves this crate in printable form: `Debug` on
//! [`Credential`] is redacted, and the PEM identity handed to the TLS layer
//! is wrapped in [`zeroize::Zeroizing`].
//!
//! [`BlobStore`]: nfe_core::BlobStore

pub mod cache;
pub mod credential;
pub mod error;
pub mod xmldsig;

pub use cache::CredentialCache;
pub use credential::{extract_metadata, CertificateMetadata, Credential};
pub use error::{CertificateError, SignatureError};
