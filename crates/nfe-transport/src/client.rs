//! # mTLS Transport
//!
//! [`Transport`] is the seam between the engine and the network: one SOAP
//! round trip, authenticated with the tenant's certificate. [`HttpTransport`]
//! implements it over `reqwest` with `rustls`.
//!
//! ## Design
//!
//! - One `reqwest::Client` per certificate fingerprint. The TLS identity is
//!   fixed at client construction, so tenants sharing a certificate share a
//!   connection pool and tenants with different certificates never do.
//!   [`Transport::release()`] drops a client once its credential is
//!   invalidated; the next send with that certificate builds a fresh one.
//! - A non-2xx status is not an error. The authority reports SOAP faults
//!   with HTTP 500, and the body is what the caller needs to see.
//! - No retries. A timeout becomes [`TransportError::Timeout`].
//!
//! ## Security Invariant
//!
//! The server certificate chain is not verified when
//! `accept_invalid_certs` is set (the default). The authorities chain to
//! ICP-Brasil roots that are missing from the usual trust stores. Client
//! authentication is unaffected.

use std::error::Error as _;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use nfe_crypto::Credential;
use reqwest::header::{HeaderValue, CONTENT_TYPE};

use crate::config::TransportConfig;
use crate::endpoints::Endpoint;
use crate::envelope::soap_envelope;
use crate::error::TransportError;

/// Raw answer of one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, verbatim.
    pub body: String,
}

impl TransportResponse {
    /// Whether the HTTP status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One SOAP round trip with the authority.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wrap `payload` in the endpoint's SOAP envelope and post it,
    /// authenticating with `credential`.
    async fn send(
        &self,
        endpoint: &Endpoint,
        payload: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError>;

    /// Drop any state held for `credential`. Called after the credential
    /// is invalidated.
    fn release(&self, _credential: &Credential) {}
}

/// [`Transport`] over HTTPS with client certificates.
pub struct HttpTransport {
    config: TransportConfig,
    clients: DashMap<String, reqwest::Client>,
}

impl HttpTransport {
    /// Create a transport with the given configuration.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of distinct client identities built so far.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Drop the client built for the certificate with `fingerprint`.
    pub fn evict(&self, fingerprint: &str) -> bool {
        let removed = self.clients.remove(fingerprint).is_some();
        if removed {
            tracing::debug!(fingerprint, "transport client evicted");
        }
        removed
    }

    fn client_for(&self, credential: &Credential) -> Result<reqwest::Client, TransportError> {
        if let Some(client) = self.clients.get(credential.fingerprint()) {
            return Ok(client.clone());
        }
        let pem = credential
            .identity_pem()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        let identity = reqwest::Identity::from_pem(pem.as_bytes())
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        tracing::debug!(
            fingerprint = credential.fingerprint(),
            "built transport client"
        );
        Ok(self
            .clients
            .entry(credential.fingerprint().to_string())
            .or_insert(client)
            .clone())
    }

    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::Timeout {
                elapsed_ms: self.config.timeout_ms(),
            };
        }
        let chain = error_chain(err);
        let lowered = chain.to_ascii_lowercase();
        if ["certificate", "tls", "handshake", "alert"]
            .iter()
            .any(|needle| lowered.contains(needle))
        {
            TransportError::Tls(chain)
        } else {
            TransportError::Network(chain)
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        payload: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        let url = endpoint.target(self.config.endpoint_base_override.as_ref())?;
        let client = self.client_for(credential)?;
        let content_type = HeaderValue::from_str(&format!(
            "application/soap+xml; charset=utf-8; action=\"{}\"",
            endpoint.service.soap_action()
        ))
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        let started = Instant::now();
        tracing::debug!(service = %endpoint.service, %url, "sending request");
        let response = client
            .post(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(soap_envelope(endpoint.service, payload))
            .send()
            .await
            .map_err(|e| {
                let err = self.classify(&e);
                tracing::warn!(service = %endpoint.service, %url, error = %err, "request failed");
                err
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.classify(&e))?;
        tracing::info!(
            service = %endpoint.service,
            status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "authority answered"
        );
        Ok(TransportResponse { status, body })
    }

    fn release(&self, credential: &Credential) {
        self.evict(credential.fingerprint());
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
