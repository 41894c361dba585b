//! # Per-Tenant Credential Cache
//!
//! Parsing a PKCS#12 container costs a PBKDF2 run and an RSA key decode, so
//! each tenant's credential is parsed once and shared as `Arc<Credential>`.
//!
//! ## Design
//!
//! - One [`OnceCell`] per tenant inside a [`DashMap`]. Concurrent first
//!   calls for the same tenant wait on the same cell, so the container is
//!   fetched and parsed exactly once. Reads of a populated cell take no
//!   lock beyond the map shard.
//! - A failed load leaves the cell empty; the next call retries.
//! - [`CredentialCache::invalidate()`] must be called after a tenant
//!   uploads a new container. Nothing expires on its own. It hands back the
//!   dropped credential so holders of per-certificate state (the HTTP
//!   clients) can release theirs.

use std::sync::Arc;

use dashmap::DashMap;
use nfe_core::{BlobStore, TenantId};
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::credential::Credential;
use crate::error::CertificateError;

/// Explicit, injectable cache of parsed credentials keyed by tenant.
pub struct CredentialCache {
    store: Arc<dyn BlobStore>,
    entries: DashMap<TenantId, Arc<OnceCell<Arc<Credential>>>>,
}

impl CredentialCache {
    /// Create an empty cache reading containers from `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    /// Return the tenant's credential, loading and parsing it on first use.
    pub async fn load_for_tenant(
        &self,
        tenant: &TenantId,
        password: &str,
    ) -> Result<Arc<Credential>, CertificateError> {
        let cell = self.entries.entry(*tenant).or_default().clone();
        let credential = cell
            .get_or_try_init(|| async {
                tracing::debug!(%tenant, "loading credential container");
                let container = self.store.credential_container(tenant).await?;
                let password = Zeroizing::new(password.to_owned());
                let parsed = tokio::task::spawn_blocking(move || {
                    Credential::parse(&container, &password)
                })
                .await
                .map_err(|e| CertificateError::Malformed(format!("parser task failed: {e}")))??;

                let meta = parsed.metadata();
                if meta.is_valid() {
                    tracing::info!(
                        %tenant,
                        subject = %meta.subject,
                        days_until_expiry = meta.days_until_expiry(),
                        "credential loaded"
                    );
                } else {
                    tracing::warn!(
                        %tenant,
                        subject = %meta.subject,
                        not_after = %meta.not_after,
                        "credential loaded outside its validity window"
                    );
                }
                Ok::<_, CertificateError>(Arc::new(parsed))
            })
            .await?;
        Ok(Arc::clone(credential))
    }

    /// Drop the tenant's cached credential, returning it if it was loaded.
    pub fn invalidate(&self, tenant: &TenantId) -> Option<Arc<Credential>> {
        let (_, cell) = self.entries.remove(tenant)?;
        tracing::debug!(%tenant, "credential invalidated");
        cell.get().cloned()
    }

    /// Number of tenants with a loaded credential.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Whether no credential is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the tenant has a loaded credential.
    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.entries
            .get(tenant)
            .is_some_and(|cell| cell.initialized())
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("loaded", &self.len())
            .finish()
    }
}
