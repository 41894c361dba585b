//! # Transmission Orchestrator
//!
//! Drives one document from structured input to the authority's decision:
//!
//! ```text
//! Building -> Signed -> Submitted -> { Authorized | Pending | Rejected | TransportFailure }
//! ```
//!
//! ## Design
//!
//! - The outcome of a submission is always data ([`TransmissionResult`]).
//!   `Err` is reserved for failures that happen before anything reaches the
//!   authority: invalid input, an unusable credential, a broken store.
//! - Nothing here retries or sleeps. Pending and halted outcomes report
//!   [`TransmissionResult::is_retryable()`] and the caller schedules the
//!   follow-up (see [`crate::jobs`]).
//! - Once the authority has answered, store failures while recording the
//!   answer are logged, not returned. Reporting an authorized document as
//!   failed would invite a resubmission that the authority rejects as a
//!   duplicate.

use std::sync::Arc;

use nfe_core::{AccessKey, BlobStore, Environment, FiscalDocument, StoreError, TenantId, Uf};
use nfe_crypto::{xmldsig, CredentialCache};
use nfe_document::wrap_processed;
use nfe_transport::envelope::{authorization_batch, protocol_query, receipt_query, status_query};
use nfe_transport::response::{parse_response, AuthorityResponse, Protocol};
use nfe_transport::{resolve, ResponseError, Service, Transport, TransportError};
use serde::Serialize;

use crate::error::TransmissionError;
use crate::status::{classify, StatusClass, SERVICE_IN_OPERATION};
use crate::store::{InvoiceRecord, InvoiceStatus, RecordStore, TenantDirectory, TenantProfile};

/// Prefix of the `Id` of the signed element (`infNFe`).
const SIGNED_ELEMENT_PREFIX: &str = "NFe";

/// Why a submission did not reach a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportCause {
    /// The round trip failed.
    Transport { error: String, retryable: bool },
    /// The authority answered with something unreadable.
    UnreadableResponse { http_status: u16, error: String },
    /// The authorizer reported itself halted (`cStat` 108 or 109).
    ServiceHalted { code: u16, reason: String },
}

impl TransportCause {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::UnreadableResponse { .. } | Self::ServiceHalted { .. } => true,
        }
    }
}

impl From<TransportError> for TransportCause {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            retryable: err.is_retryable(),
            error: err.to_string(),
        }
    }
}

impl std::fmt::Display for TransportCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { error, .. } => write!(f, "{error}"),
            Self::UnreadableResponse { http_status, error } => {
                write!(f, "HTTP {http_status}: {error}")
            }
            Self::ServiceHalted { code, reason } => write!(f, "{code}: {reason}"),
        }
    }
}

/// The outcome of a submission or consultation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransmissionResult {
    /// Authorized for use.
    Authorized {
        access_key: Option<AccessKey>,
        protocol: Option<String>,
        code: u16,
        reason: String,
        received_at: Option<String>,
    },
    /// Accepted for processing; consult the receipt later.
    Pending {
        access_key: Option<AccessKey>,
        receipt: Option<String>,
        code: u16,
        reason: String,
    },
    /// Refused. `reason` is the authority's text, verbatim.
    Rejected {
        access_key: Option<AccessKey>,
        codes: Vec<u16>,
        reason: String,
    },
    /// No decision was obtained.
    TransportFailure {
        access_key: Option<AccessKey>,
        cause: TransportCause,
    },
}

impl TransmissionResult {
    /// Whether asking again later may change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pending { .. } => true,
            Self::TransportFailure { cause, .. } => cause.is_retryable(),
            Self::Authorized { .. } | Self::Rejected { .. } => false,
        }
    }

    /// The document the outcome refers to, when known.
    pub fn access_key(&self) -> Option<&AccessKey> {
        match self {
            Self::Authorized { access_key, .. }
            | Self::Pending { access_key, .. }
            | Self::Rejected { access_key, .. }
            | Self::TransportFailure { access_key, .. } => access_key.as_ref(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }

    fn record_status(&self) -> Option<InvoiceStatus> {
        match self {
            Self::Authorized { .. } => Some(InvoiceStatus::Authorized),
            Self::Pending { .. } => Some(InvoiceStatus::Pending),
            Self::Rejected { .. } => Some(InvoiceStatus::Rejected),
            Self::TransportFailure { .. } => None,
        }
    }

    fn with_access_key(mut self, key: &AccessKey) -> Self {
        match &mut self {
            Self::Authorized { access_key, .. }
            | Self::Pending { access_key, .. }
            | Self::Rejected { access_key, .. }
            | Self::TransportFailure { access_key, .. } => {
                if access_key.is_none() {
                    *access_key = Some(key.clone());
                }
            }
        }
        self
    }
}

/// Answer of the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub code: u16,
    pub reason: String,
    pub in_operation: bool,
}

/// A classified answer plus the raw protocol needed to archive it.
struct Classified {
    result: TransmissionResult,
    protocol_xml: Option<String>,
}

/// Classify an authority answer into one or more outcomes.
///
/// `receipt` is the receipt being consulted, if any; it is echoed in
/// pending outcomes whose answer does not repeat it.
pub fn classify_response(
    response: &AuthorityResponse,
    receipt: Option<&str>,
) -> Vec<TransmissionResult> {
    interpret(response, receipt)
        .into_iter()
        .map(|c| c.result)
        .collect()
}

fn interpret(response: &AuthorityResponse, receipt: Option<&str>) -> Vec<Classified> {
    match classify(response.status) {
        StatusClass::BatchProcessed => response
            .protocols
            .iter()
            .map(|p| classify_protocol(p, receipt))
            .collect(),
        StatusClass::Authorized => {
            let protocol = response.protocols.first();
            vec![Classified {
                result: TransmissionResult::Authorized {
                    access_key: protocol.and_then(protocol_key),
                    protocol: protocol.and_then(|p| p.number.clone()),
                    code: response.status,
                    reason: response.reason.clone(),
                    received_at: protocol
                        .and_then(|p| p.received_at.clone())
                        .or_else(|| response.received_at.clone()),
                },
                protocol_xml: protocol.map(|p| p.xml.clone()),
            }]
        }
        StatusClass::Pending => vec![plain(TransmissionResult::Pending {
            access_key: None,
            receipt: response
                .receipt
                .clone()
                .or_else(|| receipt.map(str::to_string)),
            code: response.status,
            reason: response.reason.clone(),
        })],
        StatusClass::ServiceHalted => vec![plain(TransmissionResult::TransportFailure {
            access_key: None,
            cause: TransportCause::ServiceHalted {
                code: response.status,
                reason: response.reason.clone(),
            },
        })],
        StatusClass::Rejected => vec![plain(TransmissionResult::Rejected {
            access_key: None,
            codes: vec![response.status],
            reason: response.reason.clone(),
        })],
    }
}

fn classify_protocol(protocol: &Protocol, receipt: Option<&str>) -> Classified {
    let access_key = protocol_key(protocol);
    let result = match classify(protocol.status) {
        StatusClass::Authorized => {
            return Classified {
                result: TransmissionResult::Authorized {
                    access_key,
                    protocol: protocol.number.clone(),
                    code: protocol.status,
                    reason: protocol.reason.clone(),
                    received_at: protocol.received_at.clone(),
                },
                protocol_xml: Some(protocol.xml.clone()),
            }
        }
        StatusClass::Pending => TransmissionResult::Pending {
            access_key,
            receipt: receipt.map(str::to_string),
            code: protocol.status,
            reason: protocol.reason.clone(),
        },
        StatusClass::ServiceHalted => TransmissionResult::TransportFailure {
            access_key,
            cause: TransportCause::ServiceHalted {
                code: protocol.status,
                reason: protocol.reason.clone(),
            },
        },
        StatusClass::BatchProcessed | StatusClass::Rejected => TransmissionResult::Rejected {
            access_key,
            codes: vec![protocol.status],
            reason: protocol.reason.clone(),
        },
    };
    plain(result)
}

fn plain(result: TransmissionResult) -> Classified {
    Classified {
        result,
        protocol_xml: None,
    }
}

fn protocol_key(protocol: &Protocol) -> Option<AccessKey> {
    protocol
        .access_key
        .as_deref()
        .and_then(|raw| AccessKey::parse(raw).ok())
}

/// Orchestrates building, signing, submission and classification.
pub struct Orchestrator {
    credentials: Arc<CredentialCache>,
    transport: Arc<dyn Transport>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    tenants: Arc<dyn TenantDirectory>,
    synchronous: bool,
}

impl Orchestrator {
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
            synchronous: false,
        }
    }

    /// Ask for synchronous processing (`indSinc=1`) on submission.
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Forget the tenant's parsed credential and the transport state built
    /// on it. Call after the tenant uploads a new container.
    pub fn invalidate_credential(&self, tenant: &TenantId) {
        if let Some(credential) = self.credentials.invalidate(tenant) {
            self.transport.release(&credential);
            tracing::info!(%tenant, "credential and transport client released");
        }
    }

    /// Build, sign and submit `document` for `tenant`.
    #[tracing::instrument(skip(self, document), fields(access_key))]
    pub async fn transmit(
        &self,
        mut document: FiscalDocument,
        tenant: &TenantId,
        production: bool,
    ) -> Result<TransmissionResult, TransmissionError> {
        let profile = self.tenants.profile(tenant).await?;
        let environment = Environment::from_production(production);

        tracing::debug!(stage = "building", "building document");
        document.identification.environment = environment;
        document.validate()?;
        let key = document.ensure_access_key(None)?;
        tracing::Span::current().record("access_key", tracing::field::display(&key));
        let xml = nfe_document::build(&document, &key)?;

        let credential = self
            .credentials
            .load_for_tenant(tenant, &profile.certificate_password)
            .await?;
        let signed = xmldsig::sign(&xml, &credential, SIGNED_ELEMENT_PREFIX)?;
        self.blobs.put_document_xml(&key, &signed).await?;
        let totals = document.totals();
        let mut record = InvoiceRecord::new(*tenant, key.clone(), InvoiceStatus::Signed);
        record.issuer_tax_id = Some(document.issuer.tax_id.as_str().to_string());
        record.issuer_name = Some(document.issuer.name.clone());
        record.issued_at = Some(document.identification.issued_at);
        record.total = Some(totals.document);
        record.has_full_body = true;
        self.records.upsert(record).await?;
        tracing::info!(stage = "signed", "document signed and stored");

        let endpoint = resolve(Service::Authorization, document.identification.uf, environment);
        let payload = authorization_batch(batch_id(), &[signed.as_str()], self.synchronous);
        tracing::info!(stage = "submitted", authorizer = ?endpoint.authorizer, "submitting batch");
        let response = match self.transport.send(&endpoint, &payload, &credential).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(stage = "transport_failure", error = %err, "submission failed");
                return Ok(TransmissionResult::TransportFailure {
                    access_key: Some(key),
                    cause: err.into(),
                });
            }
        };

        let (classified, skipped) = match parse_response(&response.body) {
            Ok(parsed) => (interpret(&parsed, None), parsed.unreadable_protocols),
            Err(err) => (vec![unreadable(response.status, err)], 0),
        };
        let chosen = classified
            .into_iter()
            .find(|c| c.result.access_key().map_or(true, |k| *k == key))
            .unwrap_or_else(|| {
                if skipped > 0 {
                    unreadable(
                        response.status,
                        ResponseError::Malformed("protNFe of the document is unreadable".into()),
                    )
                } else {
                    plain(TransmissionResult::Rejected {
                        access_key: None,
                        codes: Vec::new(),
                        reason: "batch processed without a protocol for the document".into(),
                    })
                }
            });
        let chosen = Classified {
            result: chosen.result.with_access_key(&key),
            protocol_xml: chosen.protocol_xml,
        };
        self.settle(&profile, &chosen).await;
        Ok(chosen.result)
    }

    /// Consult the outcome of a receipt returned by an earlier submission.
    #[tracing::instrument(skip(self))]
    pub async fn consult_receipt(
        &self,
        receipt: &str,
        tenant: &TenantId,
        production: bool,
    ) -> Result<Vec<TransmissionResult>, TransmissionError> {
        let profile = self.tenants.profile(tenant).await?;
        let environment = Environment::from_production(production);
        let credential = self
            .credentials
            .load_for_tenant(tenant, &profile.certificate_password)
            .await?;
        let endpoint = resolve(Service::ReturnAuthorization, profile.uf, environment);
        let payload = receipt_query(receipt, environment);

        let response = match self.transport.send(&endpoint, &payload, &credential).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "receipt consultation failed");
                return Ok(vec![TransmissionResult::TransportFailure {
                    access_key: None,
                    cause: err.into(),
                }]);
            }
        };
        let classified = match parse_response(&response.body) {
            Ok(parsed) => interpret(&parsed, Some(receipt)),
            Err(err) => vec![unreadable(response.status, err)],
        };
        let mut results = Vec::with_capacity(classified.len());
        for item in classified {
            self.settle(&profile, &item).await;
            results.push(item.result);
        }
        tracing::info!(outcomes = results.len(), "receipt consulted");
        Ok(results)
    }

    /// Look up the current protocol of one document (`consSitNFe`).
    #[tracing::instrument(skip(self), fields(access_key = %key))]
    pub async fn consult_protocol(
        &self,
        key: &AccessKey,
        tenant: &TenantId,
        production: bool,
    ) -> Result<TransmissionResult, TransmissionError> {
        let profile = self.tenants.profile(tenant).await?;
        let environment = Environment::from_production(production);
        let credential = self
            .credentials
            .load_for_tenant(tenant, &profile.certificate_password)
            .await?;
        let uf = Uf::from_code(key.uf())?;
        let endpoint = resolve(Service::ProtocolQuery, uf, environment);
        let payload = protocol_query(key, environment);

        let response = match self.transport.send(&endpoint, &payload, &credential).await {
            Ok(response) => response,
            Err(err) => {
                return Ok(TransmissionResult::TransportFailure {
                    access_key: Some(key.clone()),
                    cause: err.into(),
                })
            }
        };
        let chosen = match parse_response(&response.body) {
            Ok(parsed) => interpret(&parsed, None)
                .into_iter()
                .next()
                .unwrap_or_else(|| unreadable(response.status, ResponseError::MissingField("protNFe"))),
            Err(err) => unreadable(response.status, err),
        };
        let chosen = Classified {
            result: chosen.result.with_access_key(key),
            protocol_xml: chosen.protocol_xml,
        };
        self.settle(&profile, &chosen).await;
        Ok(chosen.result)
    }

    /// Ask whether the authorizer of `uf` is operating (`cStat` 107).
    #[tracing::instrument(skip(self))]
    pub async fn service_status(
        &self,
        tenant: &TenantId,
        uf: Uf,
        production: bool,
    ) -> Result<ServiceStatus, TransmissionError> {
        let profile = self.tenants.profile(tenant).await?;
        let environment = Environment::from_production(production);
        let credential = self
            .credentials
            .load_for_tenant(tenant, &profile.certificate_password)
            .await?;
        let endpoint = resolve(Service::StatusService, uf, environment);
        let response = self
            .transport
            .send(&endpoint, &status_query(uf, environment), &credential)
            .await?;
        let parsed = parse_response(&response.body)?;
        tracing::info!(code = parsed.status, reason = %parsed.reason, "service status");
        Ok(ServiceStatus {
            in_operation: parsed.status == SERVICE_IN_OPERATION,
            code: parsed.status,
            reason: parsed.reason,
        })
    }

    /// Record the outcome and archive authorized documents.
    async fn settle(&self, profile: &TenantProfile, classified: &Classified) {
        let result = &classified.result;
        let Some(key) = result.access_key() else {
            return;
        };
        tracing::info!(
            stage = outcome_stage(result),
            access_key = %key,
            retryable = result.is_retryable(),
            "transmission outcome"
        );

        let mut has_full_body = false;
        if let (true, Some(prot)) = (result.is_authorized(), &classified.protocol_xml) {
            match self.archive(key, prot).await {
                Ok(archived) => has_full_body = archived,
                Err(err) => tracing::warn!(access_key = %key, error = %err, "archiving failed"),
            }
        }

        let Some(status) = result.record_status() else {
            return;
        };
        if let Err(err) = self.update_record(profile, key, status, result, has_full_body).await {
            tracing::warn!(access_key = %key, error = %err, "record update failed");
        }
    }

    /// Replace the stored signed XML by its `nfeProc` form. Returns whether
    /// a processed document is now stored.
    async fn archive(&self, key: &AccessKey, protocol_xml: &str) -> Result<bool, StoreError> {
        let stored = match self.blobs.document_xml(key).await {
            Ok(xml) => xml,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(access_key = %key, "no signed document to archive");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if stored.contains("<nfeProc") {
            return Ok(true);
        }
        self.blobs
            .put_document_xml(key, &wrap_processed(&stored, protocol_xml))
            .await?;
        tracing::info!(access_key = %key, "processed document archived");
        Ok(true)
    }

    async fn update_record(
        &self,
        profile: &TenantProfile,
        key: &AccessKey,
        status: InvoiceStatus,
        result: &TransmissionResult,
        archived: bool,
    ) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get(&profile.tenant, key)
            .await?
            .unwrap_or_else(|| InvoiceRecord::new(profile.tenant, key.clone(), status));
        record.status = status;
        if let TransmissionResult::Authorized {
            protocol: Some(protocol),
            ..
        } = result
        {
            record.protocol = Some(protocol.clone());
        }
        record.has_full_body |= archived;
        self.records.upsert(record).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("credentials", &self.credentials)
            .field("synchronous", &self.synchronous)
            .finish_non_exhaustive()
    }
}

fn unreadable(http_status: u16, err: ResponseError) -> Classified {
    tracing::warn!(http_status, error = %err, "unreadable authority response");
    plain(TransmissionResult::TransportFailure {
        access_key: None,
        cause: TransportCause::UnreadableResponse {
            http_status,
            error: err.to_string(),
        },
    })
}

fn outcome_stage(result: &TransmissionResult) -> &'static str {
    match result {
        TransmissionResult::Authorized { .. } => "authorized",
        TransmissionResult::Pending { .. } => "pending",
        TransmissionResult::Rejected { .. } => "rejected",
        TransmissionResult::TransportFailure { .. } => "transport_failure",
    }
}

/// `idLote`: up to 15 digits; milliseconds since the epoch fit.
fn batch_id() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
