//! # Tenant File
//!
//! The CLI reads its tenants from a YAML file. Passwords are never stored
//! in the file; each entry names the environment variable that holds its
//! certificate password.
//!
//! ```yaml
//! tenants:
//!   - id: 0b6f4c1e-8a53-4d3b-9d7e-2f1c9a7e5b10
//!     tax_id: "12.345.678/0001-90"
//!     uf: RS
//!     password_env: NFE_CERT_PASSWORD_ACME
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use nfe_core::{TaxId, TenantId, Uf};
use nfe_engine::TenantProfile;
use serde::Deserialize;

/// Top-level YAML document.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantFile {
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

/// One tenant as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantEntry {
    pub id: TenantId,
    pub tax_id: TaxId,
    /// Acronym (`RS`) or IBGE code (`43`).
    pub uf: String,
    /// Environment variable holding the certificate password.
    pub password_env: String,
}

impl TenantFile {
    /// Read and parse a tenant file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tenant file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid tenant file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Resolve every entry into a profile, reading passwords from the
    /// environment.
    pub fn profiles(&self) -> Result<Vec<TenantProfile>> {
        self.tenants.iter().map(TenantEntry::profile).collect()
    }
}

impl TenantEntry {
    pub fn profile(&self) -> Result<TenantProfile> {
        let uf = Uf::parse(&self.uf).with_context(|| format!("tenant {}", self.id))?;
        let certificate_password = std::env::var(&self.password_env).with_context(|| {
            format!(
                "tenant {}: environment variable {} is not set",
                self.id, self.password_env
            )
        })?;
        Ok(TenantProfile {
            tenant: self.id,
            tax_id: self.tax_id.clone(),
            uf,
            certificate_password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
tenants:
  - id: 0b6f4c1e-8a53-4d3b-9d7e-2f1c9a7e5b10
    tax_id: "12.345.678/0001-90"
    uf: RS
    password_env: NFE_TEST_PASSWORD_CONFIG_A
"#;

    #[test]
    fn parses_entries() {
        let file = TenantFile::parse(YAML).unwrap();
        assert_eq!(file.tenants.len(), 1);
        let entry = &file.tenants[0];
        assert_eq!(entry.tax_id.as_str(), "12345678000190");
        assert_eq!(entry.uf, "RS");
        assert_eq!(entry.id.to_string(), "0b6f4c1e-8a53-4d3b-9d7e-2f1c9a7e5b10");
    }

    #[test]
    fn profile_reads_password_from_env() {
        std::env::set_var("NFE_TEST_PASSWORD_CONFIG_A", "segredo123");
        let profiles = TenantFile::parse(YAML).unwrap().profiles().unwrap();
        std::env::remove_var("NFE_TEST_PASSWORD_CONFIG_A");
        assert_eq!(profiles[0].certificate_password, "segredo123");
        assert_eq!(profiles[0].uf.code(), 43);
    }

    #[test]
    fn missing_password_variable_is_reported() {
        let yaml = YAML.replace("NFE_TEST_PASSWORD_CONFIG_A", "NFE_TEST_PASSWORD_UNSET_4711");
        let err = TenantFile::parse(&yaml).unwrap().profiles().unwrap_err();
        assert!(format!("{err:#}").contains("NFE_TEST_PASSWORD_UNSET_4711"));
    }

    #[test]
    fn invalid_tax_id_is_rejected() {
        let yaml = YAML.replace("12.345.678/0001-90", "123");
        assert!(TenantFile::parse(&yaml).is_err());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.yaml");
        let err = TenantFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("tenants.yaml"));
        std::fs::write(&path, YAML).unwrap();
        assert_eq!(TenantFile::load(&path).unwrap().tenants.len(), 1);
    }
}
