//! # nfe-core — Foundational Types for the NF-e Stack
//!
//! Every other crate in the workspace depends on `nfe-core`; it depends on
//! nothing internal.
//!
//! ## Contents
//!
//! - **Access keys.** [`AccessKey`] is the 44-digit document identifier with
//!   its modulo-11 check digit. The only constructors are
//!   [`AccessKey::generate()`] and [`AccessKey::parse()`], so a key with a
//!   wrong check digit cannot exist.
//! - **Fiscal document model.** [`FiscalDocument`] and its blocks, with
//!   amounts held as [`rust_decimal::Decimal`]. Floats never appear in a
//!   document.
//! - **Fixed-precision formatting.** [`decimal`] renders money (2 places),
//!   quantities (4) and unit prices (10) exactly as the schema demands.
//! - **Identifier newtypes.** [`TenantId`], [`TaxId`], [`Uf`],
//!   [`Environment`].
//! - **Errors.** [`ValidationError`] for bad input, [`StoreError`] for
//!   collaborator failures.
//! - **Blob store seam.** [`BlobStore`] is the keyed binary store the
//!   credential cache and the engine read from and write to.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `nfe-*` crates.
//! - No `.unwrap()` outside tests.

pub mod access_key;
pub mod decimal;
pub mod document;
pub mod error;
pub mod identity;
pub mod store;

pub use access_key::{AccessKey, AccessKeyParts};
pub use document::FiscalDocument;
pub use error::{StoreError, ValidationError};
pub use identity::{Environment, TaxId, TenantId, Uf};
pub use store::BlobStore;
