//! # `nfe cert-info`
//!
//! Print the metadata of an A1 certificate container as JSON. Exits 2 when
//! the certificate is outside its validity window.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nfe_crypto::Credential;
use serde_json::{json, Value};

#[derive(Args, Debug)]
pub struct CertInfoArgs {
    /// PKCS#12 container.
    #[arg(long)]
    pub cert: PathBuf,
    #[arg(long, env = "NFE_CERT_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub fn run_cert_info(args: &CertInfoArgs) -> Result<u8> {
    let container = std::fs::read(&args.cert)
        .with_context(|| format!("failed to read {}", args.cert.display()))?;
    let credential = Credential::parse(&container, &args.password)
        .with_context(|| format!("failed to open {}", args.cert.display()))?;
    println!("{}", serde_json::to_string_pretty(&describe(&credential))?);
    Ok(if credential.metadata().is_valid() { 0 } else { 2 })
}

pub fn describe(credential: &Credential) -> Value {
    let meta = credential.metadata();
    json!({
        "subject": meta.subject,
        "issuer": meta.issuer,
        "serial": meta.serial,
        "tax_id": meta.tax_id,
        "not_before": meta.not_before,
        "not_after": meta.not_after,
        "valid": meta.is_valid(),
        "days_until_expiry": meta.days_until_expiry(),
        "fingerprint": credential.fingerprint(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Vec<u8> {
        std::fs::read(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("../nfe-crypto/tests/fixtures/tenant-a1.pfx"),
        )
        .unwrap()
    }

    #[test]
    fn describes_fixture_certificate() {
        let credential = Credential::parse(&container(), "segredo123").unwrap();
        let v = describe(&credential);
        assert_eq!(v["fingerprint"], credential.fingerprint());
        assert_eq!(v["subject"], credential.metadata().subject.as_str());
        assert!(v["not_after"].is_string());
    }

    #[test]
    fn wrong_password_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a1.pfx");
        std::fs::write(&path, container()).unwrap();
        let err = run_cert_info(&CertInfoArgs {
            cert: path,
            password: "errada".into(),
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("a1.pfx"));
    }
}
