//! In-memory collaborators.
//!
//! All locks are `parking_lot` and never held across `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use nfe_core::{AccessKey, BlobStore, StoreError, TenantId};
use parking_lot::RwLock;

use super::{InvoiceRecord, RecordStore, TenantDirectory, TenantProfile, Upsert};

/// [`BlobStore`] over two hash maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    containers: Arc<RwLock<HashMap<TenantId, Vec<u8>>>>,
    documents: Arc<RwLock<HashMap<AccessKey, String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tenant's PKCS#12 container.
    pub fn put_container(&self, tenant: TenantId, container: Vec<u8>) {
        self.containers.write().insert(tenant, container);
    }

    /// Number of stored documents.
    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn credential_container(&self, tenant: &TenantId) -> Result<Vec<u8>, StoreError> {
        self.containers
            .read()
            .get(tenant)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("credential container of {tenant}")))
    }

    async fn document_xml(&self, key: &AccessKey) -> Result<String, StoreError> {
        self.documents
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document {key}")))
    }

    async fn put_document_xml(&self, key: &AccessKey, xml: &str) -> Result<(), StoreError> {
        self.documents.write().insert(key.clone(), xml.to_string());
        Ok(())
    }
}

/// [`RecordStore`] over a map per tenant.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<TenantId, BTreeMap<AccessKey, InvoiceRecord>>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all tenants.
    pub fn len(&self) -> usize {
        self.records.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        tenant: &TenantId,
        key: &AccessKey,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(tenant)
            .and_then(|records| records.get(key))
            .cloned())
    }

    async fn upsert(&self, record: InvoiceRecord) -> Result<Upsert, StoreError> {
        let previous = self
            .records
            .write()
            .entry(record.tenant)
            .or_default()
            .insert(record.access_key.clone(), record);
        Ok(match previous {
            Some(_) => Upsert::Updated,
            None => Upsert::Created,
        })
    }

    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<bool, StoreError> {
        let mut guard = self.records.write();
        let records = guard.entry(record.tenant).or_default();
        if records.contains_key(&record.access_key) {
            return Ok(false);
        }
        records.insert(record.access_key.clone(), record);
        Ok(true)
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<InvoiceRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(tenant)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// [`TenantDirectory`] over a map of profiles and cursors.
#[derive(Debug, Clone, Default)]
pub struct MemoryTenantDirectory {
    profiles: Arc<RwLock<HashMap<TenantId, TenantProfile>>>,
    cursors: Arc<RwLock<HashMap<TenantId, u64>>>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tenant.
    pub fn insert(&self, profile: TenantProfile) {
        self.profiles.write().insert(profile.tenant, profile);
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn profile(&self, tenant: &TenantId) -> Result<TenantProfile, StoreError> {
        self.profiles
            .read()
            .get(tenant)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant}")))
    }

    async fn cursor(&self, tenant: &TenantId) -> Result<u64, StoreError> {
        Ok(self.cursors.read().get(tenant).copied().unwrap_or(0))
    }

    async fn advance_cursor(&self, tenant: &TenantId, nsu: u64) -> Result<u64, StoreError> {
        let mut guard = self.cursors.write();
        let cursor = guard.entry(*tenant).or_insert(0);
        *cursor = (*cursor).max(nsu);
        Ok(*cursor)
    }
}
