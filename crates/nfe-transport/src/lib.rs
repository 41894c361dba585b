//! # nfe-transport — Authority Web Service Transport
//!
//! Everything between a signed payload and the authority's raw answer:
//!
//! - [`endpoints`]: pure routing of (service, jurisdiction, environment) to
//!   the authorizer's URL.
//! - [`envelope`]: request payloads (`enviNFe`, `consReciNFe`,
//!   `consStatServ`, `consSitNFe`, `distDFeInt`) and the SOAP 1.2 envelope.
//! - [`client`]: the [`Transport`] seam and its mTLS implementation
//!   [`HttpTransport`].
//! - [`response`]: tree-based parsing of the authority's answers.
//!
//! ## Retry
//!
//! Nothing here retries. A timeout or connection failure is returned as a
//! [`TransportError`]; the caller decides what happens next.

pub mod client;
pub mod config;
pub mod endpoints;
pub mod envelope;
pub mod error;
pub mod response;

pub use client::{HttpTransport, Transport, TransportResponse};
pub use config::{ConfigError, TransportConfig};
pub use endpoints::{resolve, Authorizer, Endpoint, Service};
pub use error::{ResponseError, TransportError};
