//! # Access Key — 44-Digit Document Identifier
//!
//! Every fiscal document is identified by a 44-digit access key with a
//! fixed positional layout:
//!
//! ```text
//! | cUF | AAMM | CNPJ/CPF | mod | serie | nNF       | tpEmis | cNF      | cDV |
//! | 2   | 4    | 14       | 2   | 3     | 9         | 1      | 8        | 1   |
//! ```
//!
//! ## Invariants
//!
//! - An [`AccessKey`] always holds exactly 44 ASCII digits.
//! - The last digit is always the modulo-11 check digit of the first 43.
//!   The only constructors ([`AccessKey::generate()`] and
//!   [`AccessKey::parse()`]) enforce this; there is no way to set it.
//!
//! ## Random code
//!
//! The 8-digit `cNF` comes from [`random_code()`], which uses a
//! non-cryptographic RNG. It only reduces collisions between keys of the
//! same issuer; uniqueness is enforced by the authority, not by this code.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Length of a complete access key.
pub const ACCESS_KEY_LEN: usize = 44;

/// The eight positional inputs of an access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyParts {
    /// IBGE jurisdiction code (two digits).
    pub uf: u8,
    /// Emission year and month as `YYMM`.
    pub year_month: String,
    /// Issuer tax id, already normalized to 14 digits.
    pub tax_id: String,
    /// Document model (55 for NF-e, 65 for NFC-e).
    pub model: u8,
    /// Series, 0..=999.
    pub series: u16,
    /// Document number, 1..=999_999_999.
    pub number: u32,
    /// Emission type (`tpEmis`), one digit.
    pub emission_type: u8,
    /// Random code (`cNF`), 0..=99_999_999.
    pub code: u32,
}

impl AccessKeyParts {
    /// Render the 43-digit base, validating every field's width.
    pub fn base(&self) -> Result<String, ValidationError> {
        if !(10..=99).contains(&self.uf) {
            return Err(ValidationError::invalid("uf", "must be two digits"));
        }
        if self.year_month.len() != 4 || !all_digits(&self.year_month) {
            return Err(ValidationError::invalid("year_month", "must be 4 digits (YYMM)"));
        }
        if self.tax_id.len() != 14 || !all_digits(&self.tax_id) {
            return Err(ValidationError::invalid("tax_id", "must be 14 digits"));
        }
        if self.model > 99 {
            return Err(ValidationError::invalid("model", "must be two digits"));
        }
        if self.series > 999 {
            return Err(ValidationError::invalid("series", "must be at most 999"));
        }
        if self.number > 999_999_999 {
            return Err(ValidationError::invalid("number", "must be at most 9 digits"));
        }
        if self.emission_type > 9 {
            return Err(ValidationError::invalid("emission_type", "must be one digit"));
        }
        if self.code > 99_999_999 {
            return Err(ValidationError::invalid("code", "must be at most 8 digits"));
        }
        Ok(format!(
            "{:02}{}{}{:02}{:03}{:09}{}{:08}",
            self.uf,
            self.year_month,
            self.tax_id,
            self.model,
            self.series,
            self.number,
            self.emission_type,
            self.code
        ))
    }
}

/// A validated 44-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Build a key from its parts, appending the computed check digit.
    ///
    /// Deterministic: identical parts always produce the identical key.
    pub fn generate(parts: &AccessKeyParts) -> Result<Self, ValidationError> {
        let base = parts.base()?;
        let dv = check_digit(&base)?;
        Ok(Self(format!("{base}{dv}")))
    }

    /// Parse an externally supplied key, verifying length, digits and the
    /// check digit. Surrounding whitespace and a leading `NFe` prefix (as in
    /// `infNFe/@Id`) are tolerated.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let key = trimmed.strip_prefix("NFe").unwrap_or(trimmed);
        let reject = |reason: &str| ValidationError::InvalidAccessKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };
        if key.len() != ACCESS_KEY_LEN {
            return Err(reject("must be 44 characters"));
        }
        if !all_digits(key) {
            return Err(reject("must contain only digits"));
        }
        let expected = check_digit(&key[..43])?;
        let actual = key.as_bytes()[43] - b'0';
        if expected != actual {
            return Err(reject(&format!(
                "check digit is {actual}, expected {expected}"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// The 44 digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Jurisdiction code (positions 1–2).
    pub fn uf(&self) -> u8 {
        self.digits(0, 2) as u8
    }

    /// Year and month `YYMM` (positions 3–6).
    pub fn year_month(&self) -> &str {
        &self.0[2..6]
    }

    /// Issuer tax id, 14 digits (positions 7–20).
    pub fn tax_id(&self) -> &str {
        &self.0[6..20]
    }

    /// Document model (positions 21–22).
    pub fn model(&self) -> u8 {
        self.digits(20, 22) as u8
    }

    /// Series (positions 23–25).
    pub fn series(&self) -> u16 {
        self.digits(22, 25) as u16
    }

    /// Document number (positions 26–34).
    pub fn number(&self) -> u32 {
        self.digits(25, 34)
    }

    /// Emission type (position 35).
    pub fn emission_type(&self) -> u8 {
        self.digits(34, 35) as u8
    }

    /// Random code `cNF` (positions 36–43).
    pub fn code(&self) -> u32 {
        self.digits(35, 43)
    }

    /// Check digit `cDV` (position 44).
    pub fn check_digit(&self) -> u8 {
        self.digits(43, 44) as u8
    }

    /// The value of the `infNFe/@Id` attribute for this key.
    pub fn element_id(&self) -> String {
        format!("NFe{}", self.0)
    }

    fn digits(&self, from: usize, to: usize) -> u32 {
        self.0.as_bytes()[from..to]
            .iter()
            .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
    }
}

impl TryFrom<String> for AccessKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

impl std::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Weighted modulo-11 check digit over a digit string.
///
/// Digits are weighted right-to-left with weights cycling 2..=9. A
/// remainder of 0 or 1 yields 0; otherwise the digit is `11 - remainder`.
pub fn check_digit(base: &str) -> Result<u8, ValidationError> {
    if base.is_empty() || !all_digits(base) {
        return Err(ValidationError::invalid(
            "access_key",
            "check digit input must be a non-empty digit string",
        ));
    }
    let mut weight = 2u32;
    let mut sum = 0u32;
    for b in base.bytes().rev() {
        sum += u32::from(b - b'0') * weight;
        weight = if weight == 9 { 2 } else { weight + 1 };
    }
    let remainder = sum % 11;
    Ok(if remainder < 2 { 0 } else { (11 - remainder) as u8 })
}

/// Draw an 8-digit random code for `cNF`.
///
/// Re-draws when the code would equal the document number, which the
/// authority rejects.
pub fn random_code(number: u32) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let code = rng.gen_range(0..100_000_000u32);
        if code != number {
            return code;
        }
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}
