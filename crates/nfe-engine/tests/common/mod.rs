//! Shared harness: in-memory collaborators, the fixture credential, and a
//! transport double that answers from a script.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use nfe_core::{FiscalDocument, TaxId, TenantId, Uf};
use nfe_crypto::{Credential, CredentialCache};
use nfe_engine::store::{MemoryBlobStore, MemoryRecordStore, MemoryTenantDirectory};
use nfe_engine::{DistributionSync, Orchestrator, TenantProfile};
use nfe_transport::{Endpoint, Service, Transport, TransportError, TransportResponse};
use parking_lot::Mutex;
use std::io::Write;

pub const PASSWORD: &str = "segredo123";

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Sent {
    pub service: Service,
    pub payload: String,
}

/// Answers calls in order from a queue. Bodies may contain `{KEY}`, which
/// is replaced by the access key of the document in the request, if any.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    sent: Mutex<Vec<Sent>>,
    released: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn push_ok(&self, body: impl Into<String>) {
        self.push_status(200, body);
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) {
        self.responses.lock().push_back(Ok(TransportResponse {
            status,
            body: body.into(),
        }));
    }

    pub fn push_err(&self, err: TransportError) {
        self.responses.lock().push_back(Err(err));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Fingerprints of released credentials.
    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

fn key_in(payload: &str) -> Option<&str> {
    let start = payload.find("Id=\"NFe")? + "Id=\"NFe".len();
    payload.get(start..start + 44)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        payload: &str,
        _credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        self.sent.lock().push(Sent {
            service: endpoint.service,
            payload: payload.to_string(),
        });
        let next = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())));
        next.map(|mut response| {
            if let Some(key) = key_in(payload) {
                response.body = response.body.replace("{KEY}", key);
            }
            response
        })
    }

    fn release(&self, credential: &Credential) {
        self.released.lock().push(credential.fingerprint().to_string());
    }
}

pub struct Harness {
    pub tenant: TenantId,
    pub blobs: Arc<MemoryBlobStore>,
    pub records: Arc<MemoryRecordStore>,
    pub tenants: Arc<MemoryTenantDirectory>,
    pub credentials: Arc<CredentialCache>,
    pub transport: Arc<ScriptedTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_password(PASSWORD)
    }

    pub fn with_password(password: &str) -> Self {
        let tenant = TenantId::new();
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put_container(tenant, container());
        let tenants = Arc::new(MemoryTenantDirectory::new());
        tenants.insert(TenantProfile {
            tenant,
            tax_id: TaxId::new("12345678000190").expect("tax id"),
            uf: Uf::from_code(43).expect("uf"),
            certificate_password: password.to_string(),
        });
        Self {
            tenant,
            credentials: Arc::new(CredentialCache::new(blobs.clone())),
            blobs,
            records: Arc::new(MemoryRecordStore::new()),
            tenants,
            transport: Arc::new(ScriptedTransport::default()),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.credentials.clone(),
            self.transport.clone(),
            self.blobs.clone(),
            self.records.clone(),
            self.tenants.clone(),
        )
    }

    pub fn sync(&self) -> DistributionSync {
        DistributionSync::new(
            self.credentials.clone(),
            self.transport.clone(),
            self.blobs.clone(),
            self.records.clone(),
            self.tenants.clone(),
        )
    }
}

pub fn container() -> Vec<u8> {
    include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../nfe-crypto/tests/fixtures/tenant-a1.pfx"
    ))
    .to_vec()
}

pub fn sample_document() -> FiscalDocument {
    serde_json::from_str(include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../nfe-document/tests/fixtures/sample-document.json"
    )))
    .expect("fixture document")
}

/// Wrap a result element as the authority does.
pub fn soap(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body>\
         <nfeResultMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4\">{inner}</nfeResultMsg>\
         </soap:Body></soap:Envelope>"
    )
}

/// A `protNFe` for `key`.
pub fn prot(key: &str, status: u16, number: Option<&str>, reason: &str) -> String {
    let number = number
        .map(|n| format!("<nProt>{n}</nProt>"))
        .unwrap_or_default();
    format!(
        "<protNFe versao=\"4.00\"><infProt><tpAmb>2</tpAmb><chNFe>{key}</chNFe>\
         <dhRecbto>2026-02-10T10:00:05-03:00</dhRecbto>{number}<cStat>{status}</cStat>\
         <xMotivo>{reason}</xMotivo></infProt></protNFe>"
    )
}

/// base64(gzip(xml)), as carried by `docZip`.
pub fn doc_zip(xml: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).expect("gzip");
    STANDARD.encode(encoder.finish().expect("gzip"))
}
