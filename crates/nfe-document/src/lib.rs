//! # nfe-document — Document Builder
//!
//! Turns a [`FiscalDocument`](nfe_core::FiscalDocument) plus its
//! [`AccessKey`](nfe_core::AccessKey) into the `NFe` XML the authority
//! validates, and wraps an authorized document with its protocol into the
//! `nfeProc` archive form.
//!
//! The output has no XML declaration and no formatting whitespace, so it
//! can be embedded in a batch envelope and signed as-is.

pub mod builder;

pub use builder::{build, wrap_processed, HOMOLOGATION_NOTICE, NFE_NAMESPACE, NFE_VERSION};
