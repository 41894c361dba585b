//! # Remote Subcommands
//!
//! `transmit`, `consult`, `sync` and `status` run against the authorities
//! for one tenant of the tenant file. State lives under the data
//! directory in the filesystem layout of [`nfe_engine::store`]; the
//! tenant's A1 container is read from `credentials/{tenant}.pfx` there.
//!
//! Results are printed as JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use nfe_core::{AccessKey, FiscalDocument, TenantId, Uf};
use nfe_crypto::CredentialCache;
use nfe_engine::jobs::plan;
use nfe_engine::store::{FsBlobStore, FsRecordStore, FsTenantDirectory};
use nfe_engine::{DistributionSync, Orchestrator, RetryPolicy, TenantDirectory, TransmissionResult};
use nfe_transport::{HttpTransport, Transport, TransportConfig};
use serde_json::json;

use crate::config::TenantFile;

/// Global options shared by the remote subcommands.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    pub data_dir: PathBuf,
    pub tenants_file: Option<PathBuf>,
    pub production: bool,
}

#[derive(Args, Debug)]
pub struct TransmitArgs {
    #[arg(long)]
    pub tenant: String,
    /// Fiscal document as JSON.
    #[arg(long)]
    pub document: PathBuf,
    /// Ask for synchronous processing.
    #[arg(long)]
    pub sync: bool,
}

#[derive(Args, Debug)]
pub struct ConsultArgs {
    #[arg(long)]
    pub tenant: String,
    /// Receipt number of an asynchronous submission.
    #[arg(long, conflicts_with = "key", required_unless_present = "key")]
    pub receipt: Option<String>,
    /// Access key of a submitted document.
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[arg(long)]
    pub tenant: String,
    /// Fetch one document by access key instead of advancing the cursor.
    #[arg(long)]
    pub key: Option<String>,
    /// Keep fetching while the authority reports more documents.
    #[arg(long, default_value_t = 1)]
    pub max_rounds: u32,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long)]
    pub tenant: String,
    /// Jurisdiction to query; the tenant's own when omitted.
    #[arg(long)]
    pub uf: Option<String>,
}

/// The engine wired over the data directory.
pub struct Stack {
    pub orchestrator: Orchestrator,
    pub sync: DistributionSync,
    pub tenants: Arc<FsTenantDirectory>,
}

impl RemoteContext {
    /// Wire the engine with the HTTPS transport configured from the
    /// environment.
    pub fn open(&self) -> Result<Stack> {
        let config = TransportConfig::from_env().context("invalid transport configuration")?;
        self.open_with(Arc::new(HttpTransport::new(config)))
    }

    pub fn open_with(&self, transport: Arc<dyn Transport>) -> Result<Stack> {
        let path = self
            .tenants_file
            .as_deref()
            .context("no tenant file: pass --tenants or set NFE_TENANTS_FILE")?;
        let profiles = TenantFile::load(path)?.profiles()?;
        tracing::debug!(tenants = profiles.len(), data_dir = %self.data_dir.display(), "opening stores");

        let blobs = Arc::new(FsBlobStore::new(self.data_dir.clone()));
        let records = Arc::new(FsRecordStore::new(self.data_dir.clone()));
        let tenants = Arc::new(FsTenantDirectory::new(self.data_dir.clone(), profiles));
        let credentials = Arc::new(CredentialCache::new(blobs.clone()));
        let environment = nfe_core::Environment::from_production(self.production);
        Ok(Stack {
            orchestrator: Orchestrator::new(
                credentials.clone(),
                transport.clone(),
                blobs.clone(),
                records.clone(),
                tenants.clone(),
            ),
            sync: DistributionSync::new(credentials, transport, blobs, records, tenants.clone())
                .with_environment(environment),
            tenants,
        })
    }
}

/// Exit code for one outcome.
pub fn exit_code(result: &TransmissionResult) -> u8 {
    match result {
        TransmissionResult::Authorized { .. } | TransmissionResult::Pending { .. } => 0,
        TransmissionResult::Rejected { .. } => 2,
        TransmissionResult::TransportFailure { .. } => 3,
    }
}

fn tenant_id(raw: &str) -> Result<TenantId> {
    TenantId::parse(raw).with_context(|| format!("invalid tenant id {raw:?}"))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_transmit(args: &TransmitArgs, ctx: &RemoteContext, stack: Stack) -> Result<u8> {
    let tenant = tenant_id(&args.tenant)?;
    let raw = std::fs::read_to_string(&args.document)
        .with_context(|| format!("failed to read {}", args.document.display()))?;
    let document: FiscalDocument = serde_json::from_str(&raw)
        .with_context(|| format!("invalid fiscal document {}", args.document.display()))?;

    let result = stack
        .orchestrator
        .with_synchronous(args.sync)
        .transmit(document, &tenant, ctx.production)
        .await?;
    let follow_up = plan(tenant, ctx.production, &result, 0, &RetryPolicy::default());
    print_json(&json!({ "result": result, "follow_up": follow_up }))?;
    Ok(exit_code(&result))
}

pub async fn run_consult(args: &ConsultArgs, ctx: &RemoteContext, stack: Stack) -> Result<u8> {
    let tenant = tenant_id(&args.tenant)?;
    let results = match (&args.receipt, &args.key) {
        (Some(receipt), _) => {
            stack
                .orchestrator
                .consult_receipt(receipt, &tenant, ctx.production)
                .await?
        }
        (None, Some(key)) => {
            let key = AccessKey::parse(key).context("invalid --key")?;
            vec![
                stack
                    .orchestrator
                    .consult_protocol(&key, &tenant, ctx.production)
                    .await?,
            ]
        }
        (None, None) => anyhow::bail!("pass --receipt or --key"),
    };
    print_json(&json!({ "results": results }))?;
    Ok(results.iter().map(exit_code).max().unwrap_or(0))
}

pub async fn run_sync(args: &SyncArgs, _ctx: &RemoteContext, stack: Stack) -> Result<u8> {
    let tenant = tenant_id(&args.tenant)?;
    let mut outcomes = Vec::new();
    if let Some(key) = &args.key {
        let key = AccessKey::parse(key).context("invalid --key")?;
        outcomes.push(stack.sync.fetch_by_access_key(&tenant, &key).await?);
    } else {
        for round in 0..args.max_rounds.max(1) {
            let outcome = stack.sync.fetch_since(&tenant).await?;
            let more = outcome.has_more();
            tracing::info!(round, cursor = outcome.cursor, more, "sync round");
            outcomes.push(outcome);
            if !more {
                break;
            }
        }
    }
    print_json(&json!({ "outcomes": outcomes }))?;
    Ok(0)
}

pub async fn run_status(args: &StatusArgs, ctx: &RemoteContext, stack: Stack) -> Result<u8> {
    let tenant = tenant_id(&args.tenant)?;
    let uf = match &args.uf {
        Some(raw) => Uf::parse(raw).context("invalid --uf")?,
        None => stack.tenants.profile(&tenant).await?.uf,
    };
    let status = stack
        .orchestrator
        .service_status(&tenant, uf, ctx.production)
        .await?;
    print_json(&json!({ "uf": uf.acronym(), "status": status }))?;
    Ok(if status.in_operation { 0 } else { 2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nfe_crypto::Credential;
    use nfe_transport::{Endpoint, TransportError, TransportResponse};
    use std::sync::Mutex;

    const TENANT: &str = "0b6f4c1e-8a53-4d3b-9d7e-2f1c9a7e5b10";
    const PASSWORD_VAR: &str = "NFE_TEST_PASSWORD_REMOTE";

    /// Answers with the queued bodies in order, repeating the last one, and
    /// records payloads.
    struct QueuedTransport {
        bodies: Mutex<Vec<String>>,
        payloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for QueuedTransport {
        async fn send(
            &self,
            _endpoint: &Endpoint,
            payload: &str,
            _credential: &Credential,
        ) -> Result<TransportResponse, TransportError> {
            self.payloads.lock().unwrap().push(payload.to_string());
            let mut bodies = self.bodies.lock().unwrap();
            let body = if bodies.len() > 1 {
                bodies.remove(0)
            } else {
                bodies.first().cloned().unwrap_or_default()
            };
            Ok(TransportResponse { status: 200, body })
        }
    }

    fn soap(inner: &str) -> String {
        format!(
            "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body>\
             <nfeResultMsg>{inner}</nfeResultMsg></soap:Body></soap:Envelope>"
        )
    }

    fn context(dir: &std::path::Path) -> RemoteContext {
        std::env::set_var(PASSWORD_VAR, "segredo123");
        let tenants = dir.join("tenants.yaml");
        std::fs::write(
            &tenants,
            format!(
                "tenants:\n  - id: {TENANT}\n    tax_id: \"12345678000190\"\n    uf: RS\n    password_env: {PASSWORD_VAR}\n"
            ),
        )
        .unwrap();
        let credentials = dir.join("credentials");
        std::fs::create_dir_all(&credentials).unwrap();
        std::fs::copy(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("../nfe-crypto/tests/fixtures/tenant-a1.pfx"),
            credentials.join(format!("{TENANT}.pfx")),
        )
        .unwrap();
        RemoteContext {
            data_dir: dir.to_path_buf(),
            tenants_file: Some(tenants),
            production: false,
        }
    }

    fn transport(body: String) -> Arc<QueuedTransport> {
        queued(vec![body])
    }

    fn queued(bodies: Vec<String>) -> Arc<QueuedTransport> {
        Arc::new(QueuedTransport {
            bodies: Mutex::new(bodies),
            payloads: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn status_uses_tenant_uf_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let t = transport(soap(
            "<retConsStatServ><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo></retConsStatServ>",
        ));
        let stack = ctx.open_with(t.clone()).unwrap();
        let args = StatusArgs {
            tenant: TENANT.into(),
            uf: None,
        };

        assert_eq!(run_status(&args, &ctx, stack).await.unwrap(), 0);
        assert!(t.payloads.lock().unwrap()[0].contains("<cUF>43</cUF>"));
    }

    #[tokio::test]
    async fn halted_service_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let t = transport(soap(
            "<retConsStatServ><cStat>108</cStat><xMotivo>Servico Paralisado</xMotivo></retConsStatServ>",
        ));
        let args = StatusArgs {
            tenant: TENANT.into(),
            uf: Some("SP".into()),
        };
        let stack = ctx.open_with(t).unwrap();
        assert_eq!(run_status(&args, &ctx, stack).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sync_with_nothing_new_stops_after_one_round() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let t = transport(soap(
            "<retDistDFeInt><cStat>137</cStat><xMotivo>Nenhum documento localizado</xMotivo>\
             <ultNSU>000000000000009</ultNSU><maxNSU>000000000000009</maxNSU></retDistDFeInt>",
        ));
        let stack = ctx.open_with(t.clone()).unwrap();
        let tenants = stack.tenants.clone();
        let args = SyncArgs {
            tenant: TENANT.into(),
            key: None,
            max_rounds: 5,
        };

        assert_eq!(run_sync(&args, &ctx, stack).await.unwrap(), 0);
        assert_eq!(t.payloads.lock().unwrap().len(), 1);
        let tenant = TenantId::parse(TENANT).unwrap();
        assert_eq!(tenants.cursor(&tenant).await.unwrap(), 9);
        assert!(dir.path().join("cursors").join(TENANT).exists());
    }

    #[tokio::test]
    async fn partial_batch_drives_another_round() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let t = queued(vec![
            soap(
                "<retDistDFeInt><cStat>138</cStat><xMotivo>Documento localizado</xMotivo>\
                 <ultNSU>000000000000005</ultNSU><maxNSU>000000000000009</maxNSU></retDistDFeInt>",
            ),
            soap(
                "<retDistDFeInt><cStat>137</cStat><xMotivo>Nenhum documento localizado</xMotivo>\
                 <ultNSU>000000000000009</ultNSU><maxNSU>000000000000009</maxNSU></retDistDFeInt>",
            ),
        ]);
        let stack = ctx.open_with(t.clone()).unwrap();
        let tenants = stack.tenants.clone();
        let args = SyncArgs {
            tenant: TENANT.into(),
            key: None,
            max_rounds: 5,
        };

        assert_eq!(run_sync(&args, &ctx, stack).await.unwrap(), 0);
        let payloads = t.payloads.lock().unwrap().clone();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("<ultNSU>000000000000000</ultNSU>"));
        assert!(payloads[1].contains("<ultNSU>000000000000005</ultNSU>"));
        let tenant = TenantId::parse(TENANT).unwrap();
        assert_eq!(tenants.cursor(&tenant).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn round_limit_caps_a_long_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let t = transport(soap(
            "<retDistDFeInt><cStat>137</cStat><xMotivo>Nenhum documento localizado</xMotivo>\
             <ultNSU>000000000000003</ultNSU><maxNSU>000000000000900</maxNSU></retDistDFeInt>",
        ));
        let stack = ctx.open_with(t.clone()).unwrap();
        let args = SyncArgs {
            tenant: TENANT.into(),
            key: None,
            max_rounds: 3,
        };

        assert_eq!(run_sync(&args, &ctx, stack).await.unwrap(), 0);
        assert_eq!(t.payloads.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_tenant_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let stack = ctx.open_with(transport(String::new())).unwrap();
        let args = StatusArgs {
            tenant: TenantId::new().to_string(),
            uf: None,
        };
        assert!(run_status(&args, &ctx, stack).await.is_err());
    }

    #[test]
    fn missing_tenant_file_is_reported() {
        let ctx = RemoteContext {
            data_dir: PathBuf::from("."),
            tenants_file: None,
            production: false,
        };
        let err = ctx.open_with(transport(String::new())).err().unwrap();
        assert!(err.to_string().contains("NFE_TENANTS_FILE"));
    }

    #[test]
    fn exit_codes_follow_outcome() {
        let rejected = TransmissionResult::Rejected {
            access_key: None,
            codes: vec![539],
            reason: "Duplicidade".into(),
        };
        assert_eq!(exit_code(&rejected), 2);
    }
}
