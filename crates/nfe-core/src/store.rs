//! # Blob Storage Collaborator
//!
//! The subsystem never owns binary storage. Credential containers and
//! document XML live behind [`BlobStore`], which the host application
//! implements over its object store.

use async_trait::async_trait;

use crate::access_key::AccessKey;
use crate::error::StoreError;
use crate::identity::TenantId;

/// Keyed binary storage for credential containers and document XML.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// The PKCS#12 container of a tenant.
    async fn credential_container(&self, tenant: &TenantId) -> Result<Vec<u8>, StoreError>;

    /// The stored XML of a document, keyed by access key.
    async fn document_xml(&self, key: &AccessKey) -> Result<String, StoreError>;

    /// Store (or replace) the XML of a document.
    async fn put_document_xml(&self, key: &AccessKey, xml: &str) -> Result<(), StoreError>;
}
