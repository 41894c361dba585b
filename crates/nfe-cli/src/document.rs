//! # `nfe build`, `nfe sign`, `nfe verify`
//!
//! Offline document handling: render a fiscal document JSON into NF-e XML,
//! sign it with an A1 container, and check a signed document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use nfe_core::{AccessKey, FiscalDocument};
use nfe_crypto::{xmldsig, Credential};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Fiscal document as JSON.
    #[arg(long)]
    pub document: PathBuf,
    /// Random code (`cNF`); drawn when omitted. A key already carried by
    /// the document is kept.
    #[arg(long)]
    pub code: Option<u32>,
    /// Write the XML here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Document to sign.
    #[arg(long)]
    pub xml: PathBuf,
    /// PKCS#12 container.
    #[arg(long)]
    pub cert: PathBuf,
    #[arg(long, env = "NFE_CERT_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// Prefix of the `Id` attribute of the element to sign.
    #[arg(long, default_value = "NFe")]
    pub reference: String,
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Signed document.
    #[arg(long)]
    pub xml: PathBuf,
    /// Also check `SignatureValue` against the embedded certificate.
    #[arg(long)]
    pub full: bool,
}

pub fn run_build(args: &BuildArgs) -> Result<u8> {
    let (key, xml) = build_file(&args.document, args.code)?;
    tracing::info!(access_key = %key, "document built");
    emit(args.out.as_deref(), &xml)?;
    Ok(0)
}

pub fn run_sign(args: &SignArgs) -> Result<u8> {
    let signed = sign_file(&args.xml, &args.cert, &args.password, &args.reference)?;
    emit(args.out.as_deref(), &signed)?;
    Ok(0)
}

pub fn run_verify(args: &VerifyArgs) -> Result<u8> {
    let xml = read_text(&args.xml)?;
    let valid = if args.full {
        xmldsig::verify_signature_value(&xml)
    } else {
        xmldsig::verify(&xml)
    };
    println!("{}", if valid { "valid" } else { "invalid" });
    Ok(if valid { 0 } else { 2 })
}

/// Load, validate and render the document at `path`, assigning its key.
pub fn build_file(path: &Path, code: Option<u32>) -> Result<(AccessKey, String)> {
    let raw = read_text(path)?;
    let mut document: FiscalDocument = serde_json::from_str(&raw)
        .with_context(|| format!("invalid fiscal document {}", path.display()))?;
    document.validate()?;
    let key = document.ensure_access_key(code)?;
    let xml = nfe_document::build(&document, &key)?;
    Ok((key, xml))
}

pub fn sign_file(xml: &Path, cert: &Path, password: &str, reference: &str) -> Result<String> {
    let document = read_text(xml)?;
    let container =
        std::fs::read(cert).with_context(|| format!("failed to read {}", cert.display()))?;
    let credential = Credential::parse(&container, password)?;
    Ok(xmldsig::sign(&document, &credential, reference)?)
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn emit(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(rel: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(rel)
    }

    fn sample() -> PathBuf {
        fixture("nfe-document/tests/fixtures/sample-document.json")
    }

    fn pfx() -> PathBuf {
        fixture("nfe-crypto/tests/fixtures/tenant-a1.pfx")
    }

    #[test]
    fn build_assigns_key_from_document() {
        let (key, xml) = build_file(&sample(), Some(12_345_678)).unwrap();
        assert_eq!(key.uf(), 43);
        assert_eq!(key.number(), 1);
        assert_eq!(key.code(), 12_345_678);
        assert!(xml.contains(&format!("Id=\"NFe{key}\"")));
    }

    #[test]
    fn build_keeps_key_carried_by_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sample()).unwrap()).unwrap();
        let (key, _) = build_file(&sample(), Some(12_345_678)).unwrap();
        value["identification"]["access_key"] = key.as_str().into();
        std::fs::write(&path, value.to_string()).unwrap();

        let (again, _) = build_file(&path, None).unwrap();
        assert_eq!(again, key);
        assert!(build_file(&path, Some(1)).is_err());
    }

    #[test]
    fn build_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{}").unwrap();
        let err = build_file(&path, None).unwrap_err();
        assert!(format!("{err:#}").contains("doc.json"));
    }

    #[test]
    fn sign_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let unsigned = dir.path().join("unsigned.xml");
        let signed = dir.path().join("signed.xml");
        let (_, xml) = build_file(&sample(), Some(1)).unwrap();
        std::fs::write(&unsigned, xml).unwrap();

        run_sign(&SignArgs {
            xml: unsigned,
            cert: pfx(),
            password: "segredo123".into(),
            reference: "NFe".into(),
            out: Some(signed.clone()),
        })
        .unwrap();

        let verify = |full| run_verify(&VerifyArgs { xml: signed.clone(), full }).unwrap();
        assert_eq!(verify(false), 0);
        assert_eq!(verify(true), 0);
    }

    #[test]
    fn verify_flags_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let (_, xml) = build_file(&sample(), Some(1)).unwrap();
        let path = dir.path().join("unsigned.xml");
        std::fs::write(&path, xml).unwrap();
        let signed = sign_file(&path, &pfx(), "segredo123", "NFe").unwrap();
        let tampered = signed.replace("EMPRESA TESTE LTDA", "EMPRESA ALTERADA LTDA");
        std::fs::write(&path, tampered).unwrap();
        assert_eq!(run_verify(&VerifyArgs { xml: path, full: false }).unwrap(), 2);
    }

    #[test]
    fn sign_with_wrong_password_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unsigned.xml");
        std::fs::write(&path, build_file(&sample(), Some(1)).unwrap().1).unwrap();
        assert!(sign_file(&path, &pfx(), "errada", "NFe").is_err());
    }
}
