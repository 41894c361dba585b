//! Filesystem collaborators.
//!
//! Layout under a root directory:
//!
//! ```text
//! credentials/{tenant}.pfx
//! documents/{access_key}.xml
//! records/{tenant}/{access_key}.json
//! cursors/{tenant}
//! ```
//!
//! Replacing writes go to a temporary sibling first and are renamed into
//! place, so a reader never sees a half-written file.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nfe_core::{AccessKey, BlobStore, StoreError, TenantId};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{InvoiceRecord, RecordStore, TenantDirectory, TenantProfile, Upsert};

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// [`BlobStore`] over a directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where a tenant's container is read from.
    pub fn container_path(&self, tenant: &TenantId) -> PathBuf {
        self.root.join("credentials").join(format!("{tenant}.pfx"))
    }

    /// Where a document's XML is kept.
    pub fn document_path(&self, key: &AccessKey) -> PathBuf {
        self.root.join("documents").join(format!("{key}.xml"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn credential_container(&self, tenant: &TenantId) -> Result<Vec<u8>, StoreError> {
        let path = self.container_path(tenant);
        read_optional(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.display().to_string()))
    }

    async fn document_xml(&self, key: &AccessKey) -> Result<String, StoreError> {
        let path = self.document_path(key);
        let bytes = read_optional(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.display().to_string()))?;
        String::from_utf8(bytes).map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))
    }

    async fn put_document_xml(&self, key: &AccessKey, xml: &str) -> Result<(), StoreError> {
        write_atomic(&self.document_path(key), xml.as_bytes()).await
    }
}

/// [`RecordStore`] with one JSON file per record.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join("records").join(tenant.to_string())
    }

    fn record_path(&self, tenant: &TenantId, key: &AccessKey) -> PathBuf {
        self.tenant_dir(tenant).join(format!("{key}.json"))
    }
}

fn decode_record(path: &Path, bytes: &[u8]) -> Result<InvoiceRecord, StoreError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))
}

fn encode_record(record: &InvoiceRecord) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(record).map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn get(
        &self,
        tenant: &TenantId,
        key: &AccessKey,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        let path = self.record_path(tenant, key);
        read_optional(&path)
            .await?
            .map(|bytes| decode_record(&path, &bytes))
            .transpose()
    }

    async fn upsert(&self, record: InvoiceRecord) -> Result<Upsert, StoreError> {
        let path = self.record_path(&record.tenant, &record.access_key);
        let existed = tokio::fs::try_exists(&path).await?;
        write_atomic(&path, &encode_record(&record)?).await?;
        Ok(if existed { Upsert::Updated } else { Upsert::Created })
    }

    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<bool, StoreError> {
        let path = self.record_path(&record.tenant, &record.access_key);
        tokio::fs::create_dir_all(self.tenant_dir(&record.tenant)).await?;
        let bytes = encode_record(&record)?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<InvoiceRecord>, StoreError> {
        let dir = self.tenant_dir(tenant);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(decode_record(&path, &bytes)?);
        }
        records.sort_by(|a, b| a.access_key.cmp(&b.access_key));
        Ok(records)
    }
}

/// [`TenantDirectory`] with fixed profiles and cursors kept on disk.
#[derive(Debug)]
pub struct FsTenantDirectory {
    profiles: HashMap<TenantId, TenantProfile>,
    root: PathBuf,
    cursor_lock: Mutex<()>,
}

impl FsTenantDirectory {
    pub fn new(root: impl Into<PathBuf>, profiles: impl IntoIterator<Item = TenantProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.tenant, p)).collect(),
            root: root.into(),
            cursor_lock: Mutex::new(()),
        }
    }

    fn cursor_path(&self, tenant: &TenantId) -> PathBuf {
        self.root.join("cursors").join(tenant.to_string())
    }

    async fn read_cursor(&self, tenant: &TenantId) -> Result<u64, StoreError> {
        let path = self.cursor_path(tenant);
        match read_optional(&path).await? {
            None => Ok(0),
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .trim()
                .parse()
                .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display()))),
        }
    }
}

#[async_trait]
impl TenantDirectory for FsTenantDirectory {
    async fn profile(&self, tenant: &TenantId) -> Result<TenantProfile, StoreError> {
        self.profiles
            .get(tenant)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant}")))
    }

    async fn cursor(&self, tenant: &TenantId) -> Result<u64, StoreError> {
        self.read_cursor(tenant).await
    }

    async fn advance_cursor(&self, tenant: &TenantId, nsu: u64) -> Result<u64, StoreError> {
        let _guard = self.cursor_lock.lock().await;
        let current = self.read_cursor(tenant).await?;
        if nsu <= current {
            return Ok(current);
        }
        write_atomic(&self.cursor_path(tenant), nsu.to_string().as_bytes()).await?;
        Ok(nsu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InvoiceStatus;
    use nfe_core::{TaxId, Uf};

    fn key() -> AccessKey {
        AccessKey::parse("43260212345678000190550010000000011123456789").unwrap()
    }

    #[tokio::test]
    async fn blob_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(matches!(
            store.document_xml(&key()).await,
            Err(StoreError::NotFound(_))
        ));
        store.put_document_xml(&key(), "<NFe/>").await.unwrap();
        store.put_document_xml(&key(), "<nfeProc/>").await.unwrap();
        assert_eq!(store.document_xml(&key()).await.unwrap(), "<nfeProc/>");
        assert!(!store.document_path(&key()).with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn container_is_read_from_credentials_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let tenant = TenantId::new();
        std::fs::create_dir_all(dir.path().join("credentials")).unwrap();
        std::fs::write(store.container_path(&tenant), b"\x30\x82").unwrap();
        assert_eq!(store.credential_container(&tenant).await.unwrap(), b"\x30\x82");
    }

    #[tokio::test]
    async fn records_upsert_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let tenant = TenantId::new();
        assert!(store.list(&tenant).await.unwrap().is_empty());

        let mut record = InvoiceRecord::new(tenant, key(), InvoiceStatus::Authorized);
        assert!(store.insert_if_absent(record.clone()).await.unwrap());
        assert!(!store.insert_if_absent(record.clone()).await.unwrap());

        record.has_full_body = true;
        assert_eq!(store.upsert(record.clone()).await.unwrap(), Upsert::Updated);
        assert_eq!(store.list(&tenant).await.unwrap(), vec![record.clone()]);
        assert_eq!(store.get(&tenant, &key()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn cursor_persists_and_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        let profile = TenantProfile {
            tenant,
            tax_id: TaxId::new("12345678000190").unwrap(),
            uf: Uf::from_code(43).unwrap(),
            certificate_password: "segredo123".into(),
        };
        let directory = FsTenantDirectory::new(dir.path(), [profile.clone()]);
        assert_eq!(directory.profile(&tenant).await.unwrap(), profile);
        assert_eq!(directory.advance_cursor(&tenant, 25).await.unwrap(), 25);
        assert_eq!(directory.advance_cursor(&tenant, 3).await.unwrap(), 25);

        let reopened = FsTenantDirectory::new(dir.path(), [profile]);
        assert_eq!(reopened.cursor(&tenant).await.unwrap(), 25);
    }
}
