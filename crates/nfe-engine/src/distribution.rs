//! # Distribution Sync
//!
//! Pulls the documents addressed to a tenant from the national
//! distribution service, starting after the tenant's cursor (NSU), and
//! reconciles them into the record and blob stores.
//!
//! ## Design
//!
//! - Each `docZip` is base64 of gzipped XML. `resNFe*` fragments are
//!   summaries and only create a placeholder record when none exists.
//!   `procNFe*` fragments are full processed documents; the XML goes to the
//!   blob store and the record is created or updated. Anything else
//!   (events) is counted as skipped.
//! - Both handlers are keyed by access key, so replaying a batch is
//!   harmless.
//! - A fragment that fails to decode or reconcile is logged and counted.
//!   It never aborts the batch.
//!
//! ## Cursor Invariant
//!
//! The cursor moves only after a successful call (`cStat` 137 or 138) and
//! only forward; [`crate::TenantDirectory::advance_cursor()`] keeps the
//! maximum. Schema rejections and authority errors leave it untouched.

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::DateTime;
use flate2::read::GzDecoder;
use nfe_core::{AccessKey, BlobStore, Environment, StoreError, TenantId};
use nfe_crypto::CredentialCache;
use nfe_transport::envelope::{distribution_query, DistributionQuery};
use nfe_transport::response::{parse_distribution, DistributionBatch, DocZip};
use nfe_transport::{resolve, Service, Transport};
use roxmltree::{Document, Node};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::error::SyncError;
use crate::status::{classify, StatusClass, DOCUMENTS_FOUND, NO_DOCUMENTS, SCHEMA_REJECTED};
use crate::store::{InvoiceRecord, InvoiceStatus, RecordStore, TenantDirectory, Upsert};

/// Counters of one sync call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// `cStat` of the answer.
    pub status: u16,
    /// `xMotivo`, verbatim.
    pub reason: String,
    /// Summary fragments that created a placeholder record.
    pub summaries_created: usize,
    /// Summary fragments whose document was already known.
    pub summaries_known: usize,
    /// Full documents stored (created or updated).
    pub full_documents: usize,
    /// Fragments of other schemas.
    pub skipped: usize,
    /// Fragments that failed to decode or reconcile.
    pub failed: usize,
    /// The tenant's cursor after the call.
    pub cursor: u64,
    /// `ultNSU` of the answer: the last NSU this batch covers.
    pub last_nsu: Option<u64>,
    /// `maxNSU` reported by the authority.
    pub max_nsu: Option<u64>,
}

impl SyncOutcome {
    /// Fragments reconciled into storage.
    pub fn processed(&self) -> usize {
        self.summaries_created + self.summaries_known + self.full_documents
    }

    /// Whether the batch stopped short of `maxNSU`, so another call would
    /// return more.
    pub fn has_more(&self) -> bool {
        matches!((self.last_nsu, self.max_nsu), (Some(last), Some(max)) if last < max)
    }
}

/// Why one fragment could not be reconciled.
#[derive(Error, Debug)]
enum FragmentError {
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid access key: {0}")]
    Key(#[from] nfe_core::ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Reconciled {
    Summary { created: bool },
    Full,
    Skipped,
}

/// Incremental distribution client for all tenants.
pub struct DistributionSync {
    credentials: Arc<CredentialCache>,
    transport: Arc<dyn Transport>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    tenants: Arc<dyn TenantDirectory>,
    environment: Environment,
}

impl DistributionSync {
    pub fn new(
        credentials: Arc<CredentialCache>,
        transport: Arc<dyn Transport>,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        tenants: Arc<dyn TenantDirectory>,
    ) -> Self {
        Self {
            credentials,
            transport,
            blobs,
            records,
            tenants,
            environment: Environment::Production,
        }
    }

    /// Query the given environment instead of production.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Fetch and reconcile everything after the tenant's cursor.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_since(&self, tenant: &TenantId) -> Result<SyncOutcome, SyncError> {
        let cursor = self.tenants.cursor(tenant).await?;
        tracing::debug!(nsu = cursor, "distribution sync starting");
        let batch = self.request(tenant, &DistributionQuery::After(cursor)).await?;

        let mut outcome = match batch.status {
            DOCUMENTS_FOUND => self.reconcile_batch(tenant, &batch).await,
            NO_DOCUMENTS => SyncOutcome::default(),
            code => return Err(authority_error(code, &batch.reason)),
        };
        outcome.status = batch.status;
        outcome.reason = batch.reason.clone();
        outcome.last_nsu = batch.last_nsu;
        outcome.max_nsu = batch.max_nsu;

        let target = if outcome.has_more() {
            batch.last_nsu
        } else {
            batch
                .max_nsu
                .or(batch.last_nsu)
                .or_else(|| batch.documents.iter().map(|d| d.nsu).max())
        };
        outcome.cursor = match target {
            Some(nsu) => self.tenants.advance_cursor(tenant, nsu).await?,
            None => cursor,
        };
        tracing::info!(
            code = outcome.status,
            nsu = outcome.cursor,
            more = outcome.has_more(),
            processed = outcome.processed(),
            skipped = outcome.skipped,
            failed = outcome.failed,
            "distribution sync finished"
        );
        Ok(outcome)
    }

    /// Fetch and reconcile one document by access key. The cursor is not
    /// touched.
    #[tracing::instrument(skip(self), fields(access_key = %key))]
    pub async fn fetch_by_access_key(
        &self,
        tenant: &TenantId,
        key: &AccessKey,
    ) -> Result<SyncOutcome, SyncError> {
        let batch = self
            .request(tenant, &DistributionQuery::AccessKey(key.clone()))
            .await?;
        let mut outcome = match batch.status {
            DOCUMENTS_FOUND => self.reconcile_batch(tenant, &batch).await,
            NO_DOCUMENTS => SyncOutcome::default(),
            code => return Err(authority_error(code, &batch.reason)),
        };
        outcome.status = batch.status;
        outcome.reason = batch.reason.clone();
        outcome.last_nsu = batch.last_nsu;
        outcome.max_nsu = batch.max_nsu;
        outcome.cursor = self.tenants.cursor(tenant).await?;
        Ok(outcome)
    }

    async fn request(
        &self,
        tenant: &TenantId,
        query: &DistributionQuery,
    ) -> Result<DistributionBatch, SyncError> {
        let profile = self.tenants.profile(tenant).await?;
        let credential = self
            .credentials
            .load_for_tenant(tenant, &profile.certificate_password)
            .await?;
        let endpoint = resolve(Service::Distribution, profile.uf, self.environment);
        let payload = distribution_query(self.environment, profile.uf, &profile.tax_id, query);
        let response = self.transport.send(&endpoint, &payload, &credential).await?;
        Ok(parse_distribution(&response.body)?)
    }

    async fn reconcile_batch(&self, tenant: &TenantId, batch: &DistributionBatch) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            failed: batch.unreadable_documents,
            ..SyncOutcome::default()
        };
        for doc in &batch.documents {
            match self.reconcile(tenant, doc).await {
                Ok(Reconciled::Summary { created: true }) => outcome.summaries_created += 1,
                Ok(Reconciled::Summary { created: false }) => outcome.summaries_known += 1,
                Ok(Reconciled::Full) => outcome.full_documents += 1,
                Ok(Reconciled::Skipped) => {
                    tracing::debug!(nsu = doc.nsu, schema = %doc.schema, "fragment skipped");
                    outcome.skipped += 1;
                }
                Err(err) => {
                    tracing::warn!(nsu = doc.nsu, schema = %doc.schema, error = %err, "fragment failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    async fn reconcile(&self, tenant: &TenantId, doc: &DocZip) -> Result<Reconciled, FragmentError> {
        if doc.schema.starts_with("resNFe") {
            let xml = inflate(&doc.content)?;
            let record = summary_record(*tenant, doc.nsu, &xml)?;
            let created = self.records.insert_if_absent(record).await?;
            return Ok(Reconciled::Summary { created });
        }
        if doc.schema.starts_with("procNFe") {
            let xml = inflate(&doc.content)?;
            let mut record = full_record(*tenant, doc.nsu, &xml)?;
            self.blobs.put_document_xml(&record.access_key, &xml).await?;
            if let Some(existing) = self.records.get(tenant, &record.access_key).await? {
                record.protocol = record.protocol.or(existing.protocol);
            }
            let upsert = self.records.upsert(record).await?;
            tracing::debug!(nsu = doc.nsu, created = upsert == Upsert::Created, "full document stored");
            return Ok(Reconciled::Full);
        }
        Ok(Reconciled::Skipped)
    }
}

impl std::fmt::Debug for DistributionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionSync")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

fn authority_error(code: u16, reason: &str) -> SyncError {
    if code == SCHEMA_REJECTED {
        SyncError::SchemaRejected {
            reason: reason.to_string(),
        }
    } else {
        SyncError::Authority {
            code,
            reason: reason.to_string(),
        }
    }
}

/// Base64 then gunzip.
fn inflate(content: &str) -> Result<String, FragmentError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let gz = STANDARD.decode(compact)?;
    let mut xml = String::new();
    GzDecoder::new(gz.as_slice()).read_to_string(&mut xml)?;
    Ok(xml)
}

fn summary_record(tenant: TenantId, nsu: u64, xml: &str) -> Result<InvoiceRecord, FragmentError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    let key = text(root, "chNFe").ok_or(FragmentError::Missing("chNFe"))?;
    let mut record = InvoiceRecord::new(tenant, AccessKey::parse(&key)?, InvoiceStatus::Authorized);
    record.issuer_tax_id = text(root, "CNPJ").or_else(|| text(root, "CPF"));
    record.issuer_name = text(root, "xNome");
    record.issued_at = text(root, "dhEmi").and_then(|v| DateTime::parse_from_rfc3339(&v).ok());
    record.total = text(root, "vNF").and_then(|v| Decimal::from_str(&v).ok());
    record.protocol = text(root, "nProt");
    record.nsu = Some(nsu);
    Ok(record)
}

fn full_record(tenant: TenantId, nsu: u64, xml: &str) -> Result<InvoiceRecord, FragmentError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    let info = element(root, "infProt");
    let key = info
        .and_then(|n| text(n, "chNFe"))
        .or_else(|| {
            element(root, "infNFe")
                .and_then(|n| n.attribute("Id"))
                .map(str::to_string)
        })
        .ok_or(FragmentError::Missing("chNFe"))?;

    let status = match info.and_then(|n| text(n, "cStat")).and_then(|c| c.parse().ok()) {
        Some(code) if classify(code) == StatusClass::Authorized => InvoiceStatus::Authorized,
        Some(_) => InvoiceStatus::Rejected,
        None => InvoiceStatus::Authorized,
    };
    let mut record = InvoiceRecord::new(tenant, AccessKey::parse(&key)?, status);
    if let Some(emit) = element(root, "emit") {
        record.issuer_tax_id = child_text(emit, "CNPJ").or_else(|| child_text(emit, "CPF"));
        record.issuer_name = child_text(emit, "xNome");
    }
    record.issued_at = element(root, "ide")
        .and_then(|ide| child_text(ide, "dhEmi"))
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok());
    record.total = element(root, "ICMSTot")
        .and_then(|tot| child_text(tot, "vNF"))
        .and_then(|v| Decimal::from_str(&v).ok());
    record.protocol = info.and_then(|n| text(n, "nProt"));
    record.nsu = Some(nsu);
    record.has_full_body = true;
    Ok(record)
}

fn element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn text(node: Node<'_, '_>, name: &str) -> Option<String> {
    element(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}
