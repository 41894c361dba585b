//! # Identifier Newtypes
//!
//! Tenant ids, taxpayer ids, jurisdiction (UF) codes and the authority
//! environment. Each has a validating constructor; none is a bare string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of a tenant (an issuing company) in the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Generate a new random tenant identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a tenant identifier from its hyphenated UUID form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::invalid("tenant_id", e.to_string()))
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Brazilian taxpayer id: a CNPJ (14 digits) or a CPF (11 digits).
///
/// Punctuation is stripped at construction. The stored form is digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Normalize and validate a CNPJ or CPF.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let stray = raw
            .chars()
            .any(|c| !c.is_ascii_digit() && !matches!(c, '.' | '/' | '-' | ' '));
        if stray {
            return Err(ValidationError::invalid(
                "tax_id",
                format!("unexpected characters in {raw:?}"),
            ));
        }
        match digits.len() {
            11 | 14 => Ok(Self(digits)),
            n => Err(ValidationError::invalid(
                "tax_id",
                format!("expected 11 (CPF) or 14 (CNPJ) digits, got {n}"),
            )),
        }
    }

    /// The digits as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a company id (CNPJ).
    pub fn is_cnpj(&self) -> bool {
        self.0.len() == 14
    }

    /// The id left-padded with zeros to 14 digits, as embedded in access keys.
    pub fn padded(&self) -> String {
        format!("{:0>14}", self.0)
    }

    /// The id with its standard punctuation (`NN.NNN.NNN/NNNN-NN` or
    /// `NNN.NNN.NNN-NN`).
    pub fn formatted(&self) -> String {
        let d = &self.0;
        if self.is_cnpj() {
            format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
        } else {
            format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
        }
    }
}

impl TryFrom<String> for TaxId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl std::fmt::Display for TaxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// IBGE jurisdiction code of a Brazilian state (`cUF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Uf(u8);

const UF_TABLE: [(u8, &str); 27] = [
    (11, "RO"),
    (12, "AC"),
    (13, "AM"),
    (14, "RR"),
    (15, "PA"),
    (16, "AP"),
    (17, "TO"),
    (21, "MA"),
    (22, "PI"),
    (23, "CE"),
    (24, "RN"),
    (25, "PB"),
    (26, "PE"),
    (27, "AL"),
    (28, "SE"),
    (29, "BA"),
    (31, "MG"),
    (32, "ES"),
    (33, "RJ"),
    (35, "SP"),
    (41, "PR"),
    (42, "SC"),
    (43, "RS"),
    (50, "MS"),
    (51, "MT"),
    (52, "GO"),
    (53, "DF"),
];

impl Uf {
    /// Validate an IBGE state code.
    pub fn from_code(code: u8) -> Result<Self, ValidationError> {
        if UF_TABLE.iter().any(|(c, _)| *c == code) {
            Ok(Self(code))
        } else {
            Err(ValidationError::invalid(
                "uf",
                format!("{code} is not an IBGE state code"),
            ))
        }
    }

    /// Look a state up by its two-letter acronym (`"SP"`, `"rs"`).
    pub fn from_acronym(acronym: &str) -> Result<Self, ValidationError> {
        let upper = acronym.trim().to_ascii_uppercase();
        UF_TABLE
            .iter()
            .find(|(_, a)| *a == upper)
            .map(|(c, _)| Self(*c))
            .ok_or_else(|| ValidationError::invalid("uf", format!("unknown state {acronym:?}")))
    }

    /// Parse either a numeric code or an acronym.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().parse::<u8>() {
            Ok(code) => Self::from_code(code),
            Err(_) => Self::from_acronym(s),
        }
    }

    /// The two-digit numeric code.
    pub fn code(&self) -> u8 {
        self.0
    }

    /// The two-letter acronym.
    pub fn acronym(&self) -> &'static str {
        UF_TABLE
            .iter()
            .find(|(c, _)| *c == self.0)
            .map(|(_, a)| *a)
            .unwrap_or("??")
    }
}

impl TryFrom<u8> for Uf {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_code(value)
    }
}

impl From<Uf> for u8 {
    fn from(value: Uf) -> Self {
        value.0
    }
}

impl std::fmt::Display for Uf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.acronym())
    }
}

/// Authority environment (`tpAmb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    /// Live environment; documents have fiscal value.
    Production,
    /// Homologation (test) environment.
    Homologation,
}

impl Environment {
    /// Map the `production` flag used by the orchestrator API.
    pub fn from_production(production: bool) -> Self {
        if production {
            Self::Production
        } else {
            Self::Homologation
        }
    }

    /// The `tpAmb` code: 1 for production, 2 for homologation.
    pub fn code(&self) -> u8 {
        match self {
            Self::Production => 1,
            Self::Homologation => 2,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Homologation => f.write_str("homologation"),
        }
    }
}
