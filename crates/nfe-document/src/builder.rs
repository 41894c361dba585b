//! # NFe XML Builder
//!
//! Sections are written in the fixed schema order:
//!
//! ```text
//! NFe/infNFe: ide, emit, dest?, det[1..N], total/ICMSTot, transp, cobr?, pag, infAdic?
//! ```
//!
//! Optional sections and optional leaves are omitted entirely when absent;
//! the schema rejects empty elements. Numeric leaves use the fixed
//! precisions of [`nfe_core::decimal`].

use nfe_core::decimal::{money, quantity, rate, unit_price};
use nfe_core::document::{
    Address, Billing, Contribution, Icms, Identification, Issuer, LineItem, Payment, Recipient,
    Totals,
};
use nfe_core::{AccessKey, Environment, FiscalDocument, TaxId, ValidationError};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;

/// Namespace of every NF-e document and message.
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";
/// Layout version written to `infNFe/@versao`.
pub const NFE_VERSION: &str = "4.00";
/// Mandatory recipient name for documents issued in homologation.
pub const HOMOLOGATION_NOTICE: &str = "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Serialize `document` under `access_key`.
///
/// The key's random code and check digit become `ide/cNF` and `ide/cDV`.
/// The key must agree with the document's jurisdiction, issuer, model,
/// series and number.
pub fn build(document: &FiscalDocument, access_key: &AccessKey) -> Result<String, ValidationError> {
    document.validate()?;
    check_key_matches(document, access_key)?;

    let mut x = XmlOut::new();
    x.open_with("NFe", &[("xmlns", NFE_NAMESPACE)])?;
    let id = access_key.element_id();
    x.open_with("infNFe", &[("versao", NFE_VERSION), ("Id", id.as_str())])?;

    write_identification(&mut x, &document.identification, access_key)?;
    write_issuer(&mut x, &document.issuer)?;
    if let Some(dest) = &document.recipient {
        write_recipient(&mut x, dest, document.identification.environment)?;
    }
    let homologation_nfce = document.identification.environment == Environment::Homologation
        && document.identification.model == 65;
    for (index, item) in document.items.iter().enumerate() {
        let description = if homologation_nfce && index == 0 {
            HOMOLOGATION_NOTICE
        } else {
            item.description.as_str()
        };
        write_item(&mut x, index + 1, item, description)?;
    }
    write_totals(&mut x, &document.totals())?;

    x.open("transp")?;
    x.leaf("modFrete", &document.transport.freight_modality.to_string())?;
    x.close("transp")?;

    if let Some(billing) = &document.billing {
        write_billing(&mut x, billing)?;
    }
    write_payment(&mut x, &document.payment)?;

    if let Some(info) = document.additional_info.as_ref().filter(|i| !i.is_empty()) {
        x.open("infAdic")?;
        x.opt_leaf("infAdFisco", info.fiscal_notes.as_deref())?;
        x.opt_leaf("infCpl", info.taxpayer_notes.as_deref())?;
        x.close("infAdic")?;
    }

    x.close("infNFe")?;
    x.close("NFe")?;
    let xml = x.finish()?;
    tracing::debug!(access_key = %access_key, bytes = xml.len(), "document built");
    Ok(xml)
}

/// Assemble the `nfeProc` archive form: the signed `NFe` followed by the
/// authority's `protNFe`.
pub fn wrap_processed(signed_nfe: &str, prot_nfe: &str) -> String {
    format!(
        "<nfeProc xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\">{}{}</nfeProc>",
        strip_declaration(signed_nfe),
        strip_declaration(prot_nfe)
    )
}

fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) => rest
            .find("?>")
            .map_or(trimmed, |end| rest[end + 2..].trim_start()),
        None => trimmed,
    }
}

fn check_key_matches(document: &FiscalDocument, key: &AccessKey) -> Result<(), ValidationError> {
    let ide = &document.identification;
    let mismatch = |what: &str| ValidationError::InvalidAccessKey {
        key: key.to_string(),
        reason: format!("{what} does not match the document"),
    };
    if key.uf() != ide.uf.code() {
        return Err(mismatch("jurisdiction"));
    }
    if key.tax_id() != document.issuer.tax_id.padded() {
        return Err(mismatch("issuer tax id"));
    }
    if key.model() != ide.model {
        return Err(mismatch("model"));
    }
    if key.series() != ide.series {
        return Err(mismatch("series"));
    }
    if key.number() != ide.number {
        return Err(mismatch("number"));
    }
    if key.emission_type() != ide.emission_type {
        return Err(mismatch("emission type"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

fn write_identification(
    x: &mut XmlOut,
    ide: &Identification,
    key: &AccessKey,
) -> Result<(), ValidationError> {
    x.open("ide")?;
    x.leaf("cUF", &format!("{:02}", ide.uf.code()))?;
    x.leaf("cNF", &format!("{:08}", key.code()))?;
    x.leaf("natOp", &ide.operation_nature)?;
    x.leaf("mod", &ide.model.to_string())?;
    x.leaf("serie", &ide.series.to_string())?;
    x.leaf("nNF", &ide.number.to_string())?;
    x.leaf("dhEmi", &ide.issued_at.format(DATE_TIME_FORMAT).to_string())?;
    if let Some(departed) = ide.departed_at {
        x.leaf("dhSaiEnt", &departed.format(DATE_TIME_FORMAT).to_string())?;
    }
    x.leaf("tpNF", &ide.operation_type.to_string())?;
    x.leaf("idDest", &ide.destination.to_string())?;
    x.leaf("cMunFG", &ide.municipality_code)?;
    x.leaf("tpImp", &ide.print_format.to_string())?;
    x.leaf("tpEmis", &ide.emission_type.to_string())?;
    x.leaf("cDV", &key.check_digit().to_string())?;
    x.leaf("tpAmb", &ide.environment.code().to_string())?;
    x.leaf("finNFe", &ide.purpose.to_string())?;
    x.leaf("indFinal", if ide.final_consumer { "1" } else { "0" })?;
    x.leaf("indPres", &ide.presence.to_string())?;
    x.leaf("procEmi", &ide.process.to_string())?;
    x.leaf("verProc", &ide.process_version)?;
    x.close("ide")
}

fn write_tax_id(x: &mut XmlOut, tax_id: &TaxId) -> Result<(), ValidationError> {
    if tax_id.is_cnpj() {
        x.leaf("CNPJ", tax_id.as_str())
    } else {
        x.leaf("CPF", tax_id.as_str())
    }
}

fn write_address(x: &mut XmlOut, tag: &str, address: &Address) -> Result<(), ValidationError> {
    x.open(tag)?;
    x.leaf("xLgr", &address.street)?;
    x.leaf("nro", &address.number)?;
    x.opt_leaf("xCpl", address.complement.as_deref())?;
    x.leaf("xBairro", &address.district)?;
    x.leaf("cMun", &address.municipality_code)?;
    x.leaf("xMun", &address.municipality)?;
    x.leaf("UF", address.uf.acronym())?;
    x.opt_leaf("CEP", address.postal_code.as_deref())?;
    x.opt_leaf("cPais", address.country_code.as_deref())?;
    x.opt_leaf("xPais", address.country.as_deref())?;
    x.opt_leaf("fone", address.phone.as_deref())?;
    x.close(tag)
}

fn write_issuer(x: &mut XmlOut, emit: &Issuer) -> Result<(), ValidationError> {
    x.open("emit")?;
    write_tax_id(x, &emit.tax_id)?;
    x.leaf("xNome", &emit.name)?;
    x.opt_leaf("xFant", emit.trade_name.as_deref())?;
    write_address(x, "enderEmit", &emit.address)?;
    x.leaf("IE", &emit.state_registration)?;
    x.leaf("CRT", &emit.tax_regime.to_string())?;
    x.close("emit")
}

fn write_recipient(
    x: &mut XmlOut,
    dest: &Recipient,
    environment: Environment,
) -> Result<(), ValidationError> {
    x.open("dest")?;
    if let Some(tax_id) = &dest.tax_id {
        write_tax_id(x, tax_id)?;
    }
    let name = match environment {
        Environment::Homologation => HOMOLOGATION_NOTICE,
        Environment::Production => dest.name.as_str(),
    };
    x.leaf("xNome", name)?;
    if let Some(address) = &dest.address {
        write_address(x, "enderDest", address)?;
    }
    x.leaf("indIEDest", &dest.state_registration_indicator.to_string())?;
    x.opt_leaf("IE", dest.state_registration.as_deref())?;
    x.opt_leaf("email", dest.email.as_deref())?;
    x.close("dest")
}

fn write_item(
    x: &mut XmlOut,
    number: usize,
    item: &LineItem,
    description: &str,
) -> Result<(), ValidationError> {
    let n_item = number.to_string();
    x.open_with("det", &[("nItem", n_item.as_str())])?;

    let gtin = item.gtin.as_deref().unwrap_or("SEM GTIN");
    x.open("prod")?;
    x.leaf("cProd", &item.code)?;
    x.leaf("cEAN", gtin)?;
    x.leaf("xProd", description)?;
    x.leaf("NCM", &item.ncm)?;
    x.leaf("CFOP", &item.cfop)?;
    x.leaf("uCom", &item.unit)?;
    x.leaf("qCom", &quantity(item.quantity))?;
    x.leaf("vUnCom", &unit_price(item.unit_price))?;
    x.leaf("vProd", &money(item.gross()))?;
    x.leaf("cEANTrib", gtin)?;
    x.leaf("uTrib", &item.unit)?;
    x.leaf("qTrib", &quantity(item.quantity))?;
    x.leaf("vUnTrib", &unit_price(item.unit_price))?;
    x.opt_money("vFrete", item.freight)?;
    x.opt_money("vSeg", item.insurance)?;
    x.opt_money("vDesc", item.discount)?;
    x.opt_money("vOutro", item.other)?;
    x.leaf("indTot", "1")?;
    x.close("prod")?;

    x.open("imposto")?;
    x.open("ICMS")?;
    match &item.tax.icms {
        Icms::Normal {
            origin,
            base_mode,
            rate: icms_rate,
        } => {
            x.open("ICMS00")?;
            x.leaf("orig", &origin.to_string())?;
            x.leaf("CST", "00")?;
            x.leaf("modBC", &base_mode.to_string())?;
            x.leaf("vBC", &money(item.icms_base()))?;
            x.leaf("pICMS", &rate(*icms_rate))?;
            x.leaf("vICMS", &money(item.icms_value()))?;
            x.close("ICMS00")?;
        }
        Icms::SimplesNacional { origin, csosn } => {
            x.open("ICMSSN102")?;
            x.leaf("orig", &origin.to_string())?;
            x.leaf("CSOSN", &csosn.to_string())?;
            x.close("ICMSSN102")?;
        }
    }
    x.close("ICMS")?;
    write_contribution(x, "PIS", &item.tax.pis, item.tax_base())?;
    write_contribution(x, "COFINS", &item.tax.cofins, item.tax_base())?;
    x.close("imposto")?;

    x.close("det")
}

fn write_contribution(
    x: &mut XmlOut,
    tax: &str,
    contribution: &Contribution,
    base: Decimal,
) -> Result<(), ValidationError> {
    x.open(tax)?;
    match contribution {
        Contribution::Rate { cst, rate: pct } => {
            let group = format!("{tax}Aliq");
            x.open(&group)?;
            x.leaf("CST", cst)?;
            x.leaf("vBC", &money(base))?;
            x.leaf(&format!("p{tax}"), &rate(*pct))?;
            x.leaf(&format!("v{tax}"), &money(contribution.value(base)))?;
            x.close(&group)?;
        }
        Contribution::NotTaxed { cst } => {
            let group = format!("{tax}NT");
            x.open(&group)?;
            x.leaf("CST", cst)?;
            x.close(&group)?;
        }
    }
    x.close(tax)
}

fn write_totals(x: &mut XmlOut, t: &Totals) -> Result<(), ValidationError> {
    x.open("total")?;
    x.open("ICMSTot")?;
    for (tag, value) in [
        ("vBC", t.icms_base),
        ("vICMS", t.icms),
        ("vICMSDeson", t.icms_relief),
        ("vFCP", t.fcp),
        ("vBCST", t.st_base),
        ("vST", t.st),
        ("vFCPST", t.fcp_st),
        ("vFCPSTRet", t.fcp_st_withheld),
        ("vProd", t.products),
        ("vFrete", t.freight),
        ("vSeg", t.insurance),
        ("vDesc", t.discount),
        ("vII", t.import_tax),
        ("vIPI", t.ipi),
        ("vIPIDevol", t.ipi_returned),
        ("vPIS", t.pis),
        ("vCOFINS", t.cofins),
        ("vOutro", t.other),
        ("vNF", t.document),
    ] {
        x.leaf(tag, &money(value))?;
    }
    x.close("ICMSTot")?;
    x.close("total")
}

fn write_billing(x: &mut XmlOut, billing: &Billing) -> Result<(), ValidationError> {
    x.open("cobr")?;
    x.open("fat")?;
    x.leaf("nFat", &billing.invoice_number)?;
    x.leaf("vOrig", &money(billing.original))?;
    x.leaf("vDesc", &money(billing.discount))?;
    x.leaf("vLiq", &money(billing.net))?;
    x.close("fat")?;
    for dup in &billing.instalments {
        x.open("dup")?;
        x.leaf("nDup", &dup.number)?;
        x.leaf("dVenc", &dup.due_date.format("%Y-%m-%d").to_string())?;
        x.leaf("vDup", &money(dup.amount))?;
        x.close("dup")?;
    }
    x.close("cobr")
}

fn write_payment(x: &mut XmlOut, payment: &Payment) -> Result<(), ValidationError> {
    x.open("pag")?;
    for detail in &payment.details {
        x.open("detPag")?;
        if let Some(indicator) = detail.indicator {
            x.leaf("indPag", &indicator.to_string())?;
        }
        x.leaf("tPag", &detail.method)?;
        x.leaf("vPag", &money(detail.amount))?;
        x.close("detPag")?;
    }
    x.opt_money("vTroco", payment.change)?;
    x.close("pag")
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn emit(&mut self, event: Event<'_>) -> Result<(), ValidationError> {
        self.writer
            .write_event(event)
            .map_err(|e| ValidationError::MalformedXml(e.to_string()))
    }

    fn open(&mut self, name: &str) -> Result<(), ValidationError> {
        self.emit(Event::Start(BytesStart::new(name)))
    }

    fn open_with(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ValidationError> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.emit(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<(), ValidationError> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    /// Text is escaped the way C14N writes it (`&`, `<`, `>` only), so the
    /// authority's canonical form matches the transmitted bytes.
    fn leaf(&mut self, name: &str, text: &str) -> Result<(), ValidationError> {
        self.open(name)?;
        self.emit(Event::Text(BytesText::from_escaped(partial_escape(text))))?;
        self.close(name)
    }

    fn opt_leaf(&mut self, name: &str, text: Option<&str>) -> Result<(), ValidationError> {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => self.leaf(name, text),
            None => Ok(()),
        }
    }

    fn opt_money(&mut self, name: &str, value: Option<Decimal>) -> Result<(), ValidationError> {
        match value {
            Some(v) => self.leaf(name, &money(v)),
            None => Ok(()),
        }
    }

    fn finish(self) -> Result<String, ValidationError> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| ValidationError::MalformedXml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_processed_strips_declarations() {
        let wrapped = wrap_processed(
            "<?xml version=\"1.0\"?><NFe/>",
            "<?xml version=\"1.0\"?>\n<protNFe versao=\"4.00\"/>",
        );
        assert_eq!(
            wrapped,
            "<nfeProc xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><NFe/><protNFe versao=\"4.00\"/></nfeProc>"
        );
    }

    #[test]
    fn leaf_escapes_text() {
        let mut x = XmlOut::new();
        x.leaf("xNome", "A & B <C>").unwrap();
        assert_eq!(x.finish().unwrap(), "<xNome>A &amp; B &lt;C&gt;</xNome>");
    }

    #[test]
    fn leaf_keeps_quotes_literal() {
        let mut x = XmlOut::new();
        x.leaf("xNome", "D'AVILA \"ME\"").unwrap();
        assert_eq!(x.finish().unwrap(), "<xNome>D'AVILA \"ME\"</xNome>");
    }

    #[test]
    fn optional_leaf_is_omitted_when_blank() {
        let mut x = XmlOut::new();
        x.opt_leaf("xCpl", Some("  ")).unwrap();
        x.opt_leaf("xCpl", None).unwrap();
        assert_eq!(x.finish().unwrap(), "");
    }
}
