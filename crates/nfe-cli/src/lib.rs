//! # nfe-cli — Command-Line Interface
//!
//! The `nfe` binary. Offline subcommands work on local files only:
//!
//! - `access-key generate|check`: compose or decompose a 44-digit key.
//! - `build`: render a fiscal document JSON into unsigned NF-e XML.
//! - `sign` / `verify`: enveloped XML-DSig over a document.
//! - `cert-info`: metadata of an A1 certificate container.
//!
//! Remote subcommands talk to the authorities for a tenant named in the
//! tenant file, with state kept under the data directory:
//!
//! - `transmit`: build, sign, submit and classify one document.
//! - `consult`: query a receipt or a protocol.
//! - `sync`: pull distributed documents since the tenant's cursor.
//! - `status`: query the authorization service status.
//!
//! Every handler returns the process exit code: 0 for success, 1 for an
//! error, 2 for a negative answer (invalid key, bad signature, rejected
//! document), 3 for a transport failure.

pub mod access_key;
pub mod cert;
pub mod config;
pub mod document;
pub mod remote;
