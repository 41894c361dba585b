//! Transport configuration.
//!
//! Defaults match the authority's expectations for production use. Override
//! via environment variables or explicit construction for tests.

use std::time::Duration;

use url::Url;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Configuration of the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Hard timeout of one request/response round trip.
    pub timeout: Duration,
    /// Accept server certificates that do not chain to a known root. The
    /// authorities' ICP-Brasil chain is absent from most trust stores.
    pub accept_invalid_certs: bool,
    /// Redirect every service to this base URL, keeping the path.
    pub endpoint_base_override: Option<Url>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            accept_invalid_certs: true,
            endpoint_base_override: None,
        }
    }
}

impl TransportConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `NFE_TRANSPORT_TIMEOUT_MS` (default: 30000)
    /// - `NFE_ACCEPT_INVALID_CERTS` (default: `true`)
    /// - `NFE_ENDPOINT_BASE_OVERRIDE` (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = match std::env::var("NFE_TRANSPORT_TIMEOUT_MS") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "NFE_TRANSPORT_TIMEOUT_MS".into(),
                value: raw,
            })?,
            Err(_) => DEFAULT_TIMEOUT_MS,
        };
        let accept_invalid_certs = match std::env::var("NFE_ACCEPT_INVALID_CERTS") {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
                var: "NFE_ACCEPT_INVALID_CERTS".into(),
                value: raw,
            })?,
            Err(_) => true,
        };
        Ok(Self {
            timeout: Duration::from_millis(timeout_ms),
            accept_invalid_certs,
            endpoint_base_override: env_url("NFE_ENDPOINT_BASE_OVERRIDE")?,
        })
    }

    /// Configuration that sends every call to `base` (for test doubles).
    pub fn with_base(base: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(base.to_string(), e.to_string()))?;
        Ok(Self {
            timeout,
            accept_invalid_certs: true,
            endpoint_base_override: Some(url),
        })
    }

    /// The timeout in whole milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_url(var: &str) -> Result<Option<Url>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => Url::parse(raw.trim())
            .map(Some)
            .map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string())),
        _ => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },
}
