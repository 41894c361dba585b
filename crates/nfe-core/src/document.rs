//! # Fiscal Document Model
//!
//! The hierarchical record that the builder serializes into the authority's
//! layout. Field names are English; the XML tag each maps to is noted on
//! the field.
//!
//! ## Invariants
//!
//! - Line items are numbered 1..N in input order. Totals are aggregated from
//!   them in that order ([`Totals::from_items`]).
//! - Amounts are [`Decimal`]. Rounding to the schema precision happens once,
//!   at item level, then totals are sums of rounded item values.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::access_key::{random_code, AccessKey, AccessKeyParts};
use crate::decimal::round_money;
use crate::error::ValidationError;
use crate::identity::{Environment, TaxId, Uf};

/// Maximum number of `det` entries the schema accepts.
pub const MAX_ITEMS: usize = 990;

/// A complete fiscal document ready to be keyed, built and signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    /// `ide`
    pub identification: Identification,
    /// `emit`
    pub issuer: Issuer,
    /// `dest`, omitted when absent.
    #[serde(default)]
    pub recipient: Option<Recipient>,
    /// `det`, numbered 1..N.
    pub items: Vec<LineItem>,
    /// `transp`
    #[serde(default)]
    pub transport: TransportInfo,
    /// `cobr`, omitted when absent.
    #[serde(default)]
    pub billing: Option<Billing>,
    /// `pag`
    pub payment: Payment,
    /// `infAdic`, omitted when absent.
    #[serde(default)]
    pub additional_info: Option<AdditionalInfo>,
}

/// Identification block (`ide`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    /// `cUF`
    pub uf: Uf,
    /// `natOp`
    pub operation_nature: String,
    /// `mod`: 55 (NF-e) or 65 (NFC-e).
    #[serde(default = "default_model")]
    pub model: u8,
    /// `serie`
    pub series: u16,
    /// `nNF`
    pub number: u32,
    /// `dhEmi`
    pub issued_at: DateTime<FixedOffset>,
    /// `dhSaiEnt`
    #[serde(default)]
    pub departed_at: Option<DateTime<FixedOffset>>,
    /// `tpNF`: 0 inbound, 1 outbound.
    #[serde(default = "default_one")]
    pub operation_type: u8,
    /// `idDest`: 1 intrastate, 2 interstate, 3 foreign.
    #[serde(default = "default_one")]
    pub destination: u8,
    /// `cMunFG`, 7-digit IBGE municipality code.
    pub municipality_code: String,
    /// `tpImp`
    #[serde(default = "default_one")]
    pub print_format: u8,
    /// `tpEmis`
    #[serde(default = "default_one")]
    pub emission_type: u8,
    /// `tpAmb`
    pub environment: Environment,
    /// `finNFe`
    #[serde(default = "default_one")]
    pub purpose: u8,
    /// `indFinal`
    #[serde(default)]
    pub final_consumer: bool,
    /// `indPres`
    #[serde(default = "default_one")]
    pub presence: u8,
    /// `procEmi`
    #[serde(default)]
    pub process: u8,
    /// `verProc`
    #[serde(default = "default_process_version")]
    pub process_version: String,
    /// Carries `cNF` and `cDV`. Drawn on first transmission; a document
    /// that already carries one is resubmitted under it.
    #[serde(default)]
    pub access_key: Option<AccessKey>,
}

fn default_model() -> u8 {
    55
}

fn default_one() -> u8 {
    1
}

fn default_process_version() -> String {
    concat!("nfe-stack ", env!("CARGO_PKG_VERSION")).to_string()
}

/// Postal address (`enderEmit` / `enderDest`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// `xLgr`
    pub street: String,
    /// `nro`
    pub number: String,
    /// `xCpl`
    #[serde(default)]
    pub complement: Option<String>,
    /// `xBairro`
    pub district: String,
    /// `cMun`
    pub municipality_code: String,
    /// `xMun`
    pub municipality: String,
    /// `UF`
    pub uf: Uf,
    /// `CEP`
    #[serde(default)]
    pub postal_code: Option<String>,
    /// `cPais`
    #[serde(default)]
    pub country_code: Option<String>,
    /// `xPais`
    #[serde(default)]
    pub country: Option<String>,
    /// `fone`
    #[serde(default)]
    pub phone: Option<String>,
}

/// Issuer block (`emit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// `CNPJ` or `CPF`
    pub tax_id: TaxId,
    /// `xNome`
    pub name: String,
    /// `xFant`
    #[serde(default)]
    pub trade_name: Option<String>,
    /// `enderEmit`
    pub address: Address,
    /// `IE`
    pub state_registration: String,
    /// `CRT`: 1 Simples Nacional, 2 Simples excess, 3 normal regime.
    pub tax_regime: u8,
}

/// Recipient block (`dest`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// `CNPJ` or `CPF`; absent for anonymous consumers.
    #[serde(default)]
    pub tax_id: Option<TaxId>,
    /// `xNome`
    pub name: String,
    /// `enderDest`
    #[serde(default)]
    pub address: Option<Address>,
    /// `indIEDest`: 1 contributor, 2 exempt, 9 non-contributor.
    #[serde(default = "default_ie_indicator")]
    pub state_registration_indicator: u8,
    /// `IE`
    #[serde(default)]
    pub state_registration: Option<String>,
    /// `email`
    #[serde(default)]
    pub email: Option<String>,
}

fn default_ie_indicator() -> u8 {
    9
}

/// One product line (`det`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// `cProd`
    pub code: String,
    /// `cEAN` / `cEANTrib`; `None` renders `SEM GTIN`.
    #[serde(default)]
    pub gtin: Option<String>,
    /// `xProd`
    pub description: String,
    /// `NCM`, 8 digits.
    pub ncm: String,
    /// `CFOP`, 4 digits.
    pub cfop: String,
    /// `uCom` / `uTrib`
    pub unit: String,
    /// `qCom` / `qTrib`
    pub quantity: Decimal,
    /// `vUnCom` / `vUnTrib`
    pub unit_price: Decimal,
    /// `vFrete`
    #[serde(default)]
    pub freight: Option<Decimal>,
    /// `vSeg`
    #[serde(default)]
    pub insurance: Option<Decimal>,
    /// `vDesc`
    #[serde(default)]
    pub discount: Option<Decimal>,
    /// `vOutro`
    #[serde(default)]
    pub other: Option<Decimal>,
    /// `imposto`
    pub tax: ItemTax,
}

impl LineItem {
    /// `vProd`: quantity × unit price, rounded to cents.
    ///
    /// Items that passed [`FiscalDocument::validate`] never overflow; for
    /// anything else use [`LineItem::try_gross`].
    pub fn gross(&self) -> Decimal {
        self.try_gross().unwrap_or(Decimal::MAX)
    }

    /// [`LineItem::gross`], failing instead of overflowing.
    pub fn try_gross(&self) -> Result<Decimal, ValidationError> {
        self.quantity
            .checked_mul(self.unit_price)
            .map(round_money)
            .ok_or_else(|| ValidationError::invalid("quantity", "quantity × unit price overflows"))
    }

    /// Tax base: gross + freight + insurance + other − discount.
    pub fn tax_base(&self) -> Decimal {
        let add = |v: Option<Decimal>| v.unwrap_or(Decimal::ZERO);
        round_money(
            self.gross() + add(self.freight) + add(self.insurance) + add(self.other)
                - add(self.discount),
        )
    }

    /// `vICMS` for this item (zero under Simples Nacional).
    pub fn icms_value(&self) -> Decimal {
        match &self.tax.icms {
            Icms::Normal { rate, .. } => percent_of(self.tax_base(), *rate),
            Icms::SimplesNacional { .. } => Decimal::ZERO,
        }
    }

    /// `vBC` of ICMS for this item (zero under Simples Nacional).
    pub fn icms_base(&self) -> Decimal {
        match &self.tax.icms {
            Icms::Normal { .. } => self.tax_base(),
            Icms::SimplesNacional { .. } => Decimal::ZERO,
        }
    }

    /// `vPIS` for this item.
    pub fn pis_value(&self) -> Decimal {
        self.tax.pis.value(self.tax_base())
    }

    /// `vCOFINS` for this item.
    pub fn cofins_value(&self) -> Decimal {
        self.tax.cofins.value(self.tax_base())
    }
}

/// Tax block of an item (`imposto`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTax {
    /// `ICMS`
    pub icms: Icms,
    /// `PIS`
    pub pis: Contribution,
    /// `COFINS`
    pub cofins: Contribution,
}

/// ICMS treatment of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Icms {
    /// `ICMS00`: fully taxed at `rate` percent.
    Normal {
        /// `orig`
        origin: u8,
        /// `modBC`
        #[serde(default = "default_base_mode")]
        base_mode: u8,
        /// `pICMS`
        rate: Decimal,
    },
    /// `ICMSSN102`: Simples Nacional without credit.
    SimplesNacional {
        /// `orig`
        origin: u8,
        /// `CSOSN`
        #[serde(default = "default_csosn")]
        csosn: u16,
    },
}

fn default_base_mode() -> u8 {
    3
}

fn default_csosn() -> u16 {
    102
}

/// PIS or COFINS treatment of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Contribution {
    /// `PISAliq` / `COFINSAliq`: taxed at `rate` percent.
    Rate {
        /// `CST` (01 or 02).
        cst: String,
        /// `pPIS` / `pCOFINS`
        rate: Decimal,
    },
    /// `PISNT` / `COFINSNT`: not taxed.
    NotTaxed {
        /// `CST` (04..09).
        cst: String,
    },
}

impl Contribution {
    /// The contribution amount over `base`.
    pub fn value(&self, base: Decimal) -> Decimal {
        match self {
            Self::Rate { rate, .. } => percent_of(base, *rate),
            Self::NotTaxed { .. } => Decimal::ZERO,
        }
    }
}

fn percent_of(base: Decimal, rate: Decimal) -> Decimal {
    round_money(base * rate / Decimal::ONE_HUNDRED)
}

/// Aggregated totals (`total/ICMSTot`), in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// `vBC`
    pub icms_base: Decimal,
    /// `vICMS`
    pub icms: Decimal,
    /// `vICMSDeson`
    pub icms_relief: Decimal,
    /// `vFCP`
    pub fcp: Decimal,
    /// `vBCST`
    pub st_base: Decimal,
    /// `vST`
    pub st: Decimal,
    /// `vFCPST`
    pub fcp_st: Decimal,
    /// `vFCPSTRet`
    pub fcp_st_withheld: Decimal,
    /// `vProd`
    pub products: Decimal,
    /// `vFrete`
    pub freight: Decimal,
    /// `vSeg`
    pub insurance: Decimal,
    /// `vDesc`
    pub discount: Decimal,
    /// `vII`
    pub import_tax: Decimal,
    /// `vIPI`
    pub ipi: Decimal,
    /// `vIPIDevol`
    pub ipi_returned: Decimal,
    /// `vPIS`
    pub pis: Decimal,
    /// `vCOFINS`
    pub cofins: Decimal,
    /// `vOutro`
    pub other: Decimal,
    /// `vNF`
    pub document: Decimal,
}

impl Totals {
    /// Aggregate the item values in order.
    pub fn from_items(items: &[LineItem]) -> Self {
        let mut t = Totals::default();
        let add = |v: Option<Decimal>| v.unwrap_or(Decimal::ZERO);
        for item in items {
            t.icms_base += item.icms_base();
            t.icms += item.icms_value();
            t.products += item.gross();
            t.freight += add(item.freight);
            t.insurance += add(item.insurance);
            t.discount += add(item.discount);
            t.other += add(item.other);
            t.pis += item.pis_value();
            t.cofins += item.cofins_value();
        }
        t.document = t.products - t.discount + t.st + t.freight + t.insurance + t.other
            + t.import_tax
            + t.ipi
            + t.ipi_returned;
        t
    }
}

/// Transport block (`transp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    /// `modFrete`: 0 issuer, 1 recipient, 9 no freight.
    pub freight_modality: u8,
}

impl Default for TransportInfo {
    fn default() -> Self {
        Self {
            freight_modality: 9,
        }
    }
}

/// Billing block (`cobr`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Billing {
    /// `fat/nFat`
    pub invoice_number: String,
    /// `fat/vOrig`
    pub original: Decimal,
    /// `fat/vDesc`
    #[serde(default)]
    pub discount: Decimal,
    /// `fat/vLiq`
    pub net: Decimal,
    /// `dup`
    #[serde(default)]
    pub instalments: Vec<Instalment>,
}

/// One instalment (`dup`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instalment {
    /// `nDup`
    pub number: String,
    /// `dVenc`
    pub due_date: NaiveDate,
    /// `vDup`
    pub amount: Decimal,
}

/// Payment block (`pag`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// `detPag`, at least one.
    pub details: Vec<PaymentDetail>,
    /// `vTroco`
    #[serde(default)]
    pub change: Option<Decimal>,
}

/// One payment method (`detPag`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetail {
    /// `indPag`: 0 cash, 1 term.
    #[serde(default)]
    pub indicator: Option<u8>,
    /// `tPag`: two-digit method code ("01" cash, "17" PIX, "90" none).
    pub method: String,
    /// `vPag`
    pub amount: Decimal,
}

/// Free-text notes (`infAdic`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    /// `infAdFisco`
    #[serde(default)]
    pub fiscal_notes: Option<String>,
    /// `infCpl`
    #[serde(default)]
    pub taxpayer_notes: Option<String>,
}

impl AdditionalInfo {
    /// Whether there is nothing to emit.
    pub fn is_empty(&self) -> bool {
        self.fiscal_notes.as_deref().map_or(true, str::is_empty)
            && self.taxpayer_notes.as_deref().map_or(true, str::is_empty)
    }
}

impl FiscalDocument {
    /// Aggregated totals of the items, in item order.
    pub fn totals(&self) -> Totals {
        Totals::from_items(&self.items)
    }

    /// The access key inputs of this document for the given random code.
    pub fn access_key_parts(&self, code: u32) -> AccessKeyParts {
        let ide = &self.identification;
        AccessKeyParts {
            uf: ide.uf.code(),
            year_month: ide.issued_at.format("%y%m").to_string(),
            tax_id: self.issuer.tax_id.padded(),
            model: ide.model,
            series: ide.series,
            number: ide.number,
            emission_type: ide.emission_type,
            code,
        }
    }

    /// The key this document is transmitted under.
    ///
    /// A key already carried must agree with the document's own fields
    /// (`cUF`, `AAMM`, issuer, `mod`, `serie`, `nNF`, `tpEmis`) and is
    /// reused with its `cNF`. Otherwise a key is drawn with `code`, or a
    /// random code when `None`, and stored on the document.
    pub fn ensure_access_key(&mut self, code: Option<u32>) -> Result<AccessKey, ValidationError> {
        if let Some(existing) = &self.identification.access_key {
            let expected = AccessKey::generate(&self.access_key_parts(existing.code()))?;
            if expected != *existing {
                return Err(ValidationError::invalid(
                    "identification.access_key",
                    format!("{existing} does not match the document (expected {expected})"),
                ));
            }
            if let Some(code) = code.filter(|c| *c != existing.code()) {
                return Err(ValidationError::invalid(
                    "identification.access_key",
                    format!("carries cNF {:08}, not {code:08}", existing.code()),
                ));
            }
            return Ok(existing.clone());
        }
        let code = code.unwrap_or_else(|| random_code(self.identification.number));
        let key = AccessKey::generate(&self.access_key_parts(code))?;
        self.identification.access_key = Some(key.clone());
        Ok(key)
    }

    /// Check the structural rules the schema would otherwise reject.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ide = &self.identification;
        require("identification.operation_nature", &ide.operation_nature)?;
        if !matches!(ide.model, 55 | 65) {
            return Err(ValidationError::invalid(
                "identification.model",
                format!("{} is not 55 or 65", ide.model),
            ));
        }
        if ide.number == 0 || ide.number > 999_999_999 {
            return Err(ValidationError::invalid(
                "identification.number",
                "must be between 1 and 999999999",
            ));
        }
        if ide.series > 999 {
            return Err(ValidationError::invalid("identification.series", "must be at most 999"));
        }
        digits_exact("identification.municipality_code", &ide.municipality_code, 7)?;

        require("issuer.name", &self.issuer.name)?;
        require("issuer.state_registration", &self.issuer.state_registration)?;
        validate_address("issuer.address", &self.issuer.address)?;
        if !matches!(self.issuer.tax_regime, 1..=4) {
            return Err(ValidationError::invalid("issuer.tax_regime", "must be 1..=4"));
        }

        if let Some(dest) = &self.recipient {
            require("recipient.name", &dest.name)?;
            if let Some(address) = &dest.address {
                validate_address("recipient.address", address)?;
            }
        }

        if self.items.is_empty() {
            return Err(ValidationError::MissingField("items".into()));
        }
        if self.items.len() > MAX_ITEMS {
            return Err(ValidationError::invalid(
                "items",
                format!("at most {MAX_ITEMS} items, got {}", self.items.len()),
            ));
        }
        for (i, item) in self.items.iter().enumerate() {
            let field = |name: &str| format!("items[{i}].{name}");
            require(&field("code"), &item.code)?;
            require(&field("description"), &item.description)?;
            require(&field("unit"), &item.unit)?;
            digits_exact(&field("cfop"), &item.cfop, 4)?;
            if item.ncm != "00" {
                digits_exact(&field("ncm"), &item.ncm, 8)?;
            }
            if item.quantity <= Decimal::ZERO {
                return Err(ValidationError::invalid(field("quantity"), "must be positive"));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(ValidationError::invalid(field("unit_price"), "must not be negative"));
            }
            at_most(&field("quantity"), item.quantity, max_quantity())?;
            at_most(&field("unit_price"), item.unit_price, max_unit_price())?;
            for (name, value) in [
                ("freight", item.freight),
                ("insurance", item.insurance),
                ("discount", item.discount),
                ("other", item.other),
            ] {
                if let Some(value) = value {
                    if value < Decimal::ZERO {
                        return Err(ValidationError::invalid(field(name), "must not be negative"));
                    }
                    at_most(&field(name), value, max_amount())?;
                }
            }
            for (name, rate) in item_rates(&item.tax) {
                if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
                    return Err(ValidationError::invalid(field(name), "must be between 0 and 100"));
                }
            }
            item.try_gross().map_err(|_| {
                ValidationError::invalid(field("quantity"), "quantity × unit price overflows")
            })?;
        }

        if self.payment.details.is_empty() {
            return Err(ValidationError::MissingField("payment.details".into()));
        }
        for (i, detail) in self.payment.details.iter().enumerate() {
            digits_exact(&format!("payment.details[{i}].method"), &detail.method, 2)?;
        }
        Ok(())
    }
}

/// `qCom`: 11 integer digits, 4 decimals.
fn max_quantity() -> Decimal {
    Decimal::new(999_999_999_999_999, 4)
}

/// `vUnCom`: 11 integer digits.
fn max_unit_price() -> Decimal {
    Decimal::new(99_999_999_999, 0)
}

/// `vFrete`, `vSeg`, `vDesc`, `vOutro`: 13 integer digits, 2 decimals.
fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999_999, 2)
}

fn at_most(field: &str, value: Decimal, max: Decimal) -> Result<(), ValidationError> {
    if value > max {
        Err(ValidationError::invalid(field, format!("exceeds {max}")))
    } else {
        Ok(())
    }
}

fn item_rates(tax: &ItemTax) -> Vec<(&'static str, Decimal)> {
    let mut rates = Vec::new();
    if let Icms::Normal { rate, .. } = &tax.icms {
        rates.push(("tax.icms.rate", *rate));
    }
    if let Contribution::Rate { rate, .. } = &tax.pis {
        rates.push(("tax.pis.rate", *rate));
    }
    if let Contribution::Rate { rate, .. } = &tax.cofins {
        rates.push(("tax.cofins.rate", *rate));
    }
    rates
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field.to_string()))
    } else {
        Ok(())
    }
}

fn digits_exact(field: &str, value: &str, len: usize) -> Result<(), ValidationError> {
    if value.len() == len && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::invalid(field, format!("must be {len} digits")))
    }
}

fn validate_address(prefix: &str, address: &Address) -> Result<(), ValidationError> {
    require(&format!("{prefix}.street"), &address.street)?;
    require(&format!("{prefix}.number"), &address.number)?;
    require(&format!("{prefix}.district"), &address.district)?;
    require(&format!("{prefix}.municipality"), &address.municipality)?;
    digits_exact(&format!("{prefix}.municipality_code"), &address.municipality_code, 7)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_document() -> FiscalDocument {
        let address = Address {
            street: "Rua dos Andradas".into(),
            number: "1000".into(),
            complement: None,
            district: "Centro Historico".into(),
            municipality_code: "4314902".into(),
            municipality: "Porto Alegre".into(),
            uf: Uf::from_code(43).unwrap(),
            postal_code: Some("90020008".into()),
            country_code: Some("1058".into()),
            country: Some("BRASIL".into()),
            phone: None,
        };
        FiscalDocument {
            identification: Identification {
                uf: Uf::from_code(43).unwrap(),
                operation_nature: "VENDA".into(),
                model: 55,
                series: 1,
                number: 1,
                issued_at: DateTime::parse_from_rfc3339("2026-02-10T10:00:00-03:00").unwrap(),
                departed_at: None,
                operation_type: 1,
                destination: 1,
                municipality_code: "4314902".into(),
                print_format: 1,
                emission_type: 1,
                environment: Environment::Homologation,
                purpose: 1,
                final_consumer: true,
                presence: 1,
                process: 0,
                process_version: "test".into(),
                access_key: None,
            },
            issuer: Issuer {
                tax_id: TaxId::new("12345678000190").unwrap(),
                name: "EMPRESA TESTE LTDA".into(),
                trade_name: None,
                address: address.clone(),
                state_registration: "0960000000".into(),
                tax_regime: 3,
            },
            recipient: None,
            items: vec![
                LineItem {
                    code: "P001".into(),
                    gtin: None,
                    description: "Parafuso".into(),
                    ncm: "73181500".into(),
                    cfop: "5102".into(),
                    unit: "UN".into(),
                    quantity: dec!(3),
                    unit_price: dec!(2.50),
                    freight: None,
                    insurance: None,
                    discount: Some(dec!(0.50)),
                    other: None,
                    tax: ItemTax {
                        icms: Icms::Normal {
                            origin: 0,
                            base_mode: 3,
                            rate: dec!(17),
                        },
                        pis: Contribution::Rate {
                            cst: "01".into(),
                            rate: dec!(1.65),
                        },
                        cofins: Contribution::Rate {
                            cst: "01".into(),
                            rate: dec!(7.6),
                        },
                    },
                },
                LineItem {
                    code: "P002".into(),
                    gtin: Some("7891234567895".into()),
                    description: "Porca".into(),
                    ncm: "73181600".into(),
                    cfop: "5102".into(),
                    unit: "UN".into(),
                    quantity: dec!(10),
                    unit_price: dec!(0.35),
                    freight: None,
                    insurance: None,
                    discount: None,
                    other: None,
                    tax: ItemTax {
                        icms: Icms::Normal {
                            origin: 0,
                            base_mode: 3,
                            rate: dec!(17),
                        },
                        pis: Contribution::NotTaxed { cst: "07".into() },
                        cofins: Contribution::NotTaxed { cst: "07".into() },
                    },
                },
            ],
            transport: TransportInfo::default(),
            billing: None,
            payment: Payment {
                details: vec![PaymentDetail {
                    indicator: Some(0),
                    method: "01".into(),
                    amount: dec!(10.50),
                }],
                change: None,
            },
            additional_info: None,
        }
    }

    #[test]
    fn item_values_are_rounded_to_cents() {
        let doc = sample_document();
        let first = &doc.items[0];
        assert_eq!(first.gross(), dec!(7.50));
        assert_eq!(first.tax_base(), dec!(7.00));
        assert_eq!(first.icms_value(), dec!(1.19));
        assert_eq!(first.pis_value(), dec!(0.12));
        assert_eq!(first.cofins_value(), dec!(0.53));
    }

    #[test]
    fn totals_aggregate_items() {
        let totals = sample_document().totals();
        assert_eq!(totals.products, dec!(11.00));
        assert_eq!(totals.discount, dec!(0.50));
        assert_eq!(totals.icms_base, dec!(10.50));
        assert_eq!(totals.icms, dec!(1.19) + dec!(0.60));
        assert_eq!(totals.document, dec!(10.50));
    }

    #[test]
    fn simples_nacional_has_no_icms() {
        let mut doc = sample_document();
        doc.items[0].tax.icms = Icms::SimplesNacional {
            origin: 0,
            csosn: 102,
        };
        assert_eq!(doc.items[0].icms_value(), Decimal::ZERO);
        assert_eq!(doc.items[0].icms_base(), Decimal::ZERO);
    }

    #[test]
    fn access_key_parts_come_from_document() {
        let parts = sample_document().access_key_parts(12_345_678);
        assert_eq!(parts.uf, 43);
        assert_eq!(parts.year_month, "2602");
        assert_eq!(parts.tax_id, "12345678000190");
        assert_eq!(parts.model, 55);
        assert_eq!(parts.series, 1);
        assert_eq!(parts.number, 1);
    }

    #[test]
    fn access_key_is_drawn_once_and_kept() {
        let mut doc = sample_document();
        let key = doc.ensure_access_key(Some(12_345_678)).unwrap();
        assert_eq!(key.as_str(), "43260212345678000190550010000000011123456789");
        assert_eq!(doc.identification.access_key.as_ref(), Some(&key));
        assert_eq!(doc.ensure_access_key(None).unwrap(), key);
        assert_eq!(doc.ensure_access_key(Some(12_345_678)).unwrap(), key);
    }

    #[test]
    fn carried_key_must_match_document() {
        let mut doc = sample_document();
        doc.ensure_access_key(Some(12_345_678)).unwrap();
        doc.identification.number = 2;
        let err = doc.ensure_access_key(None).unwrap_err();
        assert!(err.to_string().contains("identification.access_key"));
    }

    #[test]
    fn carried_key_conflicting_code_rejected() {
        let mut doc = sample_document();
        doc.ensure_access_key(Some(12_345_678)).unwrap();
        assert!(doc.ensure_access_key(Some(1)).is_err());
    }

    #[test]
    fn sample_document_is_valid() {
        sample_document().validate().unwrap();
    }

    #[test]
    fn empty_items_rejected() {
        let mut doc = sample_document();
        doc.items.clear();
        assert_eq!(
            doc.validate().unwrap_err(),
            ValidationError::MissingField("items".into())
        );
    }

    #[test]
    fn bad_cfop_names_the_item() {
        let mut doc = sample_document();
        doc.items[1].cfop = "51".into();
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("items[1].cfop"));
    }

    #[test]
    fn non_positive_quantity_rejected() {
        let mut doc = sample_document();
        doc.items[0].quantity = Decimal::ZERO;
        assert!(doc.validate().is_err());
    }

    #[test]
    fn overflowing_item_is_rejected_without_panicking() {
        let mut doc = sample_document();
        doc.items[0].quantity = Decimal::MAX;
        doc.items[0].unit_price = dec!(2);
        assert!(doc.items[0].try_gross().is_err());
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("items[0].quantity"));
    }

    #[test]
    fn schema_limits_bound_item_values() {
        let mut doc = sample_document();
        doc.items[0].quantity = dec!(99999999999.9999);
        doc.items[0].unit_price = dec!(99999999999);
        doc.validate().unwrap();
        assert!(doc.items[0].try_gross().is_ok());

        doc.items[0].quantity = dec!(100000000000);
        assert!(doc.validate().unwrap_err().to_string().contains("items[0].quantity"));

        let mut doc = sample_document();
        doc.items[1].freight = Some(dec!(10000000000000));
        assert!(doc.validate().unwrap_err().to_string().contains("items[1].freight"));
    }

    #[test]
    fn rates_above_one_hundred_rejected() {
        let mut doc = sample_document();
        doc.items[0].tax.pis = Contribution::Rate {
            cst: "01".into(),
            rate: dec!(250),
        };
        assert!(doc.validate().unwrap_err().to_string().contains("items[0].tax.pis.rate"));
    }

    #[test]
    fn missing_payment_rejected() {
        let mut doc = sample_document();
        doc.payment.details.clear();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn document_deserializes_with_defaults() {
        let doc = sample_document();
        let mut json = serde_json::to_value(&doc).unwrap();
        let ide = json["identification"].as_object_mut().unwrap();
        ide.remove("model");
        ide.remove("presence");
        json.as_object_mut().unwrap().remove("transport");
        let back: FiscalDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.identification.model, 55);
        assert_eq!(back.identification.presence, 1);
        assert_eq!(back.transport.freight_modality, 9);
    }
}
