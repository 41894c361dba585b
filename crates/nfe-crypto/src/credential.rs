//! # Credential Parser
//!
//! Opens a password-protected PKCS#12 container (the "A1" certificate file a
//! taxpayer uploads) and extracts the leaf certificate, its RSA private key
//! and the certificate metadata operators care about.
//!
//! ## Security Invariant
//!
//! A [`Credential`] is never persisted in parsed form and never printed:
//! its `Debug` output shows the subject and fingerprint only. The PEM
//! identity built for the TLS client is returned as [`Zeroizing`] so it is
//! wiped when dropped.
//!
//! ## Error classification
//!
//! The container library reports a wrong password as an integrity or
//! decryption failure. Anything that mentions the MAC, the password,
//! decryption or padding is reported as [`CertificateError::BadPassword`];
//! bytes that are not DER at all, or fail for any other reason, are
//! [`CertificateError::Malformed`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use p12_keystore::KeyStore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::prelude::X509Certificate;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};
use zeroize::Zeroizing;

use crate::error::CertificateError;

/// Dotted OID of the X.520 `serialNumber` attribute.
const SERIAL_NUMBER_OID: &str = "2.5.4.5";

/// Metadata derived from the leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateMetadata {
    /// Subject CN, else O, else the full DN.
    pub subject: String,
    /// Issuer CN, else O, else the full DN.
    pub issuer: String,
    /// Serial number as uppercase hex.
    pub serial: String,
    /// Start of the validity window.
    pub not_before: DateTime<Utc>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
    /// CNPJ found in the subject, formatted `NN.NNN.NNN/NNNN-NN`.
    pub tax_id: Option<String>,
}

impl CertificateMetadata {
    /// Whether the current time falls inside the validity window.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Whole days until expiry; 0 when not currently valid.
    pub fn days_until_expiry(&self) -> i64 {
        self.days_until_expiry_at(Utc::now())
    }

    /// Whole days from `now` until expiry; 0 when not valid at `now`.
    pub fn days_until_expiry_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_valid_at(now) {
            (self.not_after - now).num_days()
        } else {
            0
        }
    }
}

/// A parsed signing credential: leaf certificate plus RSA private key.
pub struct Credential {
    certificate_der: Vec<u8>,
    private_key: RsaPrivateKey,
    metadata: CertificateMetadata,
    fingerprint: String,
}

impl Credential {
    /// Decode a PKCS#12 container with its password.
    pub fn parse(container: &[u8], password: &str) -> Result<Self, CertificateError> {
        let store =
            KeyStore::from_pkcs12(container, password).map_err(|e| classify(container, &e))?;

        let Some((_alias, chain)) = store.private_key_chain() else {
            return Err(if store.entries().next().is_some() {
                CertificateError::MissingPrivateKey
            } else {
                CertificateError::MissingCertificate
            });
        };
        let leaf = chain
            .chain()
            .first()
            .ok_or(CertificateError::MissingCertificate)?;

        Self::from_parts(leaf.as_der().to_vec(), chain.key())
    }

    /// Assemble a credential from a DER certificate and a PKCS#8 DER key.
    pub fn from_parts(
        certificate_der: Vec<u8>,
        private_key_pkcs8: &[u8],
    ) -> Result<Self, CertificateError> {
        let private_key = RsaPrivateKey::from_pkcs8_der(private_key_pkcs8)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;
        let metadata = extract_metadata(&certificate_der)?;
        let fingerprint = hex_upper(&Sha256::digest(&certificate_der));
        Ok(Self {
            certificate_der,
            private_key,
            metadata,
            fingerprint,
        })
    }

    /// The leaf certificate, DER-encoded.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// The leaf certificate as single-line base64 (`X509Certificate`).
    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(&self.certificate_der)
    }

    /// Derived certificate metadata.
    pub fn metadata(&self) -> &CertificateMetadata {
        &self.metadata
    }

    /// SHA-256 of the certificate DER, uppercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The public half of the key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Certificate and PKCS#8 key as one PEM bundle, the form TLS client
    /// identities are built from.
    pub fn identity_pem(&self) -> Result<Zeroizing<String>, CertificateError> {
        let key_pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;
        let mut bundle = Zeroizing::new(pem_block("CERTIFICATE", &self.certificate_der));
        bundle.push_str(&key_pem);
        Ok(bundle)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.metadata.subject)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Read the metadata of a DER certificate.
pub fn extract_metadata(certificate_der: &[u8]) -> Result<CertificateMetadata, CertificateError> {
    let (_, cert) = x509_parser::parse_x509_certificate(certificate_der)
        .map_err(|e| CertificateError::Malformed(format!("certificate: {e}")))?;

    let validity = cert.validity();
    let not_before = timestamp(validity.not_before.timestamp())?;
    let not_after = timestamp(validity.not_after.timestamp())?;

    Ok(CertificateMetadata {
        subject: display_name(cert.subject()),
        issuer: display_name(cert.issuer()),
        serial: serial_hex(cert.raw_serial()),
        not_before,
        not_after,
        tax_id: find_tax_id(&cert),
    })
}

/// The RSA public key embedded in a DER certificate.
pub fn certificate_public_key(certificate_der: &[u8]) -> Result<RsaPublicKey, CertificateError> {
    let (_, cert) = x509_parser::parse_x509_certificate(certificate_der)
        .map_err(|e| CertificateError::Malformed(format!("certificate: {e}")))?;
    RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))
}

fn classify<E>(container: &[u8], err: &E) -> CertificateError
where
    E: std::fmt::Display + std::fmt::Debug,
{
    if container.first() != Some(&0x30) {
        return CertificateError::Malformed("not a DER-encoded PKCS#12 container".into());
    }
    let text = format!("{err} {err:?}").to_lowercase();
    if ["mac", "password", "decrypt", "padding"]
        .iter()
        .any(|needle| text.contains(needle))
    {
        CertificateError::BadPassword
    } else {
        CertificateError::Malformed(err.to_string())
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| CertificateError::Malformed(format!("validity timestamp {secs} out of range")))
}

fn first_str<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs
        .find_map(|a| a.as_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn display_name(name: &X509Name<'_>) -> String {
    first_str(name.iter_common_name())
        .or_else(|| first_str(name.iter_organization()))
        .unwrap_or_else(|| name.to_string())
}

fn serial_hex(raw: &[u8]) -> String {
    let start = raw
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(raw.len().saturating_sub(1));
    hex_upper(&raw[start..])
}

fn find_tax_id(cert: &X509Certificate<'_>) -> Option<String> {
    let subject = cert.subject();
    let common_name = first_str(subject.iter_common_name());
    let serial_number = first_str(
        subject
            .iter_attributes()
            .filter(|a| a.attr_type().to_id_string() == SERIAL_NUMBER_OID),
    );
    [common_name, serial_number]
        .into_iter()
        .flatten()
        .find_map(|text| cnpj_run(&text))
        .map(|digits| format_cnpj(&digits))
}

/// First run of exactly 14 consecutive digits in `text`.
pub(crate) fn cnpj_run(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() == 14)
        .map(str::to_string)
}

fn format_cnpj(d: &str) -> String {
    format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
}

pub(crate) fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn pem_block(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII.
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}
