//! # Record and Tenant Collaborators
//!
//! The engine reads and writes three kinds of state it does not own:
//!
//! - document XML and credential containers ([`nfe_core::BlobStore`]),
//! - structured invoice records ([`RecordStore`]),
//! - tenant profiles and distribution cursors ([`TenantDirectory`]).
//!
//! [`memory`] backs the tests; [`fs`] backs the CLI.
//!
//! ## Invariants
//!
//! - Records are keyed by (tenant, access key). Writing the same key twice
//!   updates; it never creates a second record.
//! - A tenant's cursor never decreases. [`TenantDirectory::advance_cursor()`]
//!   stores `max(current, proposed)`.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use nfe_core::{AccessKey, StoreError, TaxId, TenantId, Uf};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use fs::{FsBlobStore, FsRecordStore, FsTenantDirectory};
pub use memory::{MemoryBlobStore, MemoryRecordStore, MemoryTenantDirectory};

/// Life-cycle status of a stored invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Signed and stored; no answer from the authority yet.
    Signed,
    /// Submitted and waiting for processing.
    Pending,
    /// Authorized for use.
    Authorized,
    /// Refused by the authority.
    Rejected,
}

/// Structured record of one document seen by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub tenant: TenantId,
    pub access_key: AccessKey,
    pub status: InvoiceStatus,
    pub issuer_tax_id: Option<String>,
    pub issuer_name: Option<String>,
    pub issued_at: Option<DateTime<FixedOffset>>,
    pub total: Option<Decimal>,
    /// Distribution sequence number it arrived with, if any.
    pub nsu: Option<u64>,
    /// Authorization protocol number (`nProt`).
    pub protocol: Option<String>,
    /// Whether the full XML is in the blob store.
    pub has_full_body: bool,
}

impl InvoiceRecord {
    /// A record with nothing known but its key and status.
    pub fn new(tenant: TenantId, access_key: AccessKey, status: InvoiceStatus) -> Self {
        Self {
            tenant,
            access_key,
            status,
            issuer_tax_id: None,
            issuer_name: None,
            issued_at: None,
            total: None,
            nsu: None,
            protocol: None,
            has_full_body: false,
        }
    }
}

/// Whether an upsert created or replaced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Structured invoice storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The record for (tenant, key), if any.
    async fn get(
        &self,
        tenant: &TenantId,
        key: &AccessKey,
    ) -> Result<Option<InvoiceRecord>, StoreError>;

    /// Insert or replace the record keyed by its tenant and access key.
    async fn upsert(&self, record: InvoiceRecord) -> Result<Upsert, StoreError>;

    /// Insert only if no record exists. Returns whether it was inserted.
    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<bool, StoreError>;

    /// Every record of a tenant, ordered by access key.
    async fn list(&self, tenant: &TenantId) -> Result<Vec<InvoiceRecord>, StoreError>;
}

/// What the engine needs to know about a tenant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant: TenantId,
    pub tax_id: TaxId,
    pub uf: Uf,
    /// Password of the tenant's credential container.
    pub certificate_password: String,
}

impl std::fmt::Debug for TenantProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantProfile")
            .field("tenant", &self.tenant)
            .field("tax_id", &self.tax_id)
            .field("uf", &self.uf)
            .field("certificate_password", &"[REDACTED]")
            .finish()
    }
}

/// Tenant profiles and distribution cursors.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// The tenant's profile.
    async fn profile(&self, tenant: &TenantId) -> Result<TenantProfile, StoreError>;

    /// The last NSU reconciled for the tenant (0 before the first sync).
    async fn cursor(&self, tenant: &TenantId) -> Result<u64, StoreError>;

    /// Move the cursor to `max(current, nsu)` and return the stored value.
    async fn advance_cursor(&self, tenant: &TenantId, nsu: u64) -> Result<u64, StoreError>;
}
