//! # Request Payloads and SOAP Envelope
//!
//! Payloads are the authority's own message schemas, namespaced with
//! `http://www.portalfiscal.inf.br/nfe`. [`soap_envelope()`] wraps one in a
//! SOAP 1.2 body whose `nfeDadosMsg` carries the service's WSDL namespace.
//! Distribution adds the `nfeDistDFeInteresse` operation element around
//! `nfeDadosMsg`, as its WSDL requires.

use nfe_core::{AccessKey, Environment, TaxId, Uf};

use crate::endpoints::Service;

/// SOAP 1.2 envelope namespace.
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";
/// Namespace of the authority's message schemas.
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";
/// Layout version of the authorization, receipt, status and protocol messages.
pub const MESSAGE_VERSION: &str = "4.00";
/// Layout version of the distribution message.
pub const DISTRIBUTION_VERSION: &str = "1.01";

/// Wrap `payload` for `service`.
pub fn soap_envelope(service: Service, payload: &str) -> String {
    let payload = strip_declaration(payload);
    let namespace = service.wsdl_namespace();
    let body = match service {
        Service::Distribution => format!(
            "<{op} xmlns=\"{namespace}\"><nfeDadosMsg>{payload}</nfeDadosMsg></{op}>",
            op = service.operation()
        ),
        _ => format!("<nfeDadosMsg xmlns=\"{namespace}\">{payload}</nfeDadosMsg>"),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap12:Envelope xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" xmlns:soap12=\"{SOAP12_NAMESPACE}\">\
         <soap12:Body>{body}</soap12:Body></soap12:Envelope>"
    )
}

/// `enviNFe`: a batch of signed documents.
///
/// `synchronous` sets `indSinc`; authorizers that support it answer with
/// the protocol directly instead of a receipt.
pub fn authorization_batch(batch_id: u64, signed_documents: &[&str], synchronous: bool) -> String {
    let documents: String = signed_documents
        .iter()
        .map(|doc| strip_declaration(doc))
        .collect();
    format!(
        "<enviNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{MESSAGE_VERSION}\">\
         <idLote>{batch_id}</idLote><indSinc>{}</indSinc>{documents}</enviNFe>",
        u8::from(synchronous)
    )
}

/// `consReciNFe`: consult the outcome of a batch receipt.
pub fn receipt_query(receipt: &str, environment: Environment) -> String {
    format!(
        "<consReciNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{MESSAGE_VERSION}\">\
         <tpAmb>{}</tpAmb><nRec>{}</nRec></consReciNFe>",
        environment.code(),
        escape_text(receipt)
    )
}

/// `consStatServ`: ask whether the authorizer is operating.
pub fn status_query(uf: Uf, environment: Environment) -> String {
    format!(
        "<consStatServ xmlns=\"{NFE_NAMESPACE}\" versao=\"{MESSAGE_VERSION}\">\
         <tpAmb>{}</tpAmb><cUF>{:02}</cUF><xServ>STATUS</xServ></consStatServ>",
        environment.code(),
        uf.code()
    )
}

/// `consSitNFe`: look up the current protocol of one document.
pub fn protocol_query(access_key: &AccessKey, environment: Environment) -> String {
    format!(
        "<consSitNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{MESSAGE_VERSION}\">\
         <tpAmb>{}</tpAmb><xServ>CONSULTAR</xServ><chNFe>{access_key}</chNFe></consSitNFe>",
        environment.code()
    )
}

/// What a `distDFeInt` request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionQuery {
    /// Everything after the given NSU (`distNSU/ultNSU`).
    After(u64),
    /// Exactly the given NSU (`consNSU/NSU`).
    Exact(u64),
    /// One document by access key (`consChNFe/chNFe`).
    AccessKey(AccessKey),
}

/// `distDFeInt`: distribution request on behalf of `tax_id`.
pub fn distribution_query(
    environment: Environment,
    author_uf: Uf,
    tax_id: &TaxId,
    query: &DistributionQuery,
) -> String {
    let tax_tag = if tax_id.is_cnpj() { "CNPJ" } else { "CPF" };
    let selector = match query {
        DistributionQuery::After(nsu) => {
            format!("<distNSU><ultNSU>{}</ultNSU></distNSU>", format_nsu(*nsu))
        }
        DistributionQuery::Exact(nsu) => {
            format!("<consNSU><NSU>{}</NSU></consNSU>", format_nsu(*nsu))
        }
        DistributionQuery::AccessKey(key) => {
            format!("<consChNFe><chNFe>{key}</chNFe></consChNFe>")
        }
    };
    format!(
        "<distDFeInt xmlns=\"{NFE_NAMESPACE}\" versao=\"{DISTRIBUTION_VERSION}\">\
         <tpAmb>{}</tpAmb><cUFAutor>{:02}</cUFAutor><{tax_tag}>{}</{tax_tag}>{selector}</distDFeInt>",
        environment.code(),
        author_uf.code(),
        tax_id.as_str()
    )
}

/// NSUs travel as 15 zero-padded digits.
pub fn format_nsu(nsu: u64) -> String {
    format!("{nsu:015}")
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

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AccessKey {
        AccessKey::parse("43260212345678000190550010000000011123456789").unwrap()
    }

    #[test]
    fn envelope_uses_service_namespace() {
        let env = soap_envelope(Service::StatusService, "<consStatServ/>");
        assert!(env.contains(
            "<soap12:Body><nfeDadosMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4\"><consStatServ/></nfeDadosMsg></soap12:Body>"
        ));
        assert!(env.contains(&format!("xmlns:soap12=\"{SOAP12_NAMESPACE}\"")));
    }

    #[test]
    fn distribution_envelope_has_operation_element() {
        let env = soap_envelope(Service::Distribution, "<distDFeInt/>");
        assert!(env.contains(
            "<nfeDistDFeInteresse xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeDistribuicaoDFe\"><nfeDadosMsg><distDFeInt/></nfeDadosMsg></nfeDistDFeInteresse>"
        ));
    }

    #[test]
    fn envelope_drops_inner_declaration() {
        let env = soap_envelope(Service::Authorization, "<?xml version=\"1.0\"?>\n<enviNFe/>");
        assert_eq!(env.matches("<?xml").count(), 1);
        assert!(env.contains("\"><enviNFe/></nfeDadosMsg>"));
    }

    #[test]
    fn batch_embeds_documents_in_order() {
        let batch = authorization_batch(42, &["<NFe>a</NFe>", "<?xml version=\"1.0\"?><NFe>b</NFe>"], true);
        assert_eq!(
            batch,
            "<enviNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><idLote>42</idLote><indSinc>1</indSinc><NFe>a</NFe><NFe>b</NFe></enviNFe>"
        );
    }

    #[test]
    fn receipt_and_status_queries() {
        let q = receipt_query("431000012345678", Environment::Homologation);
        assert!(q.contains("<tpAmb>2</tpAmb><nRec>431000012345678</nRec>"));
        let s = status_query(Uf::from_code(35).unwrap(), Environment::Production);
        assert!(s.contains("<tpAmb>1</tpAmb><cUF>35</cUF><xServ>STATUS</xServ>"));
    }

    #[test]
    fn protocol_query_carries_key() {
        let q = protocol_query(&key(), Environment::Production);
        assert!(q.contains(&format!("<chNFe>{}</chNFe>", key())));
        assert!(q.contains("<xServ>CONSULTAR</xServ>"));
    }

    #[test]
    fn distribution_selectors() {
        let cnpj = TaxId::new("12345678000190").unwrap();
        let uf = Uf::from_code(43).unwrap();
        let after = distribution_query(Environment::Production, uf, &cnpj, &DistributionQuery::After(17));
        assert!(after.contains("versao=\"1.01\""));
        assert!(after.contains("<cUFAutor>43</cUFAutor><CNPJ>12345678000190</CNPJ><distNSU><ultNSU>000000000000017</ultNSU></distNSU>"));

        let exact = distribution_query(Environment::Production, uf, &cnpj, &DistributionQuery::Exact(5));
        assert!(exact.contains("<consNSU><NSU>000000000000005</NSU></consNSU>"));

        let by_key = distribution_query(Environment::Homologation, uf, &cnpj, &DistributionQuery::AccessKey(key()));
        assert!(by_key.contains(&format!("<consChNFe><chNFe>{}</chNFe></consChNFe>", key())));
    }

    #[test]
    fn cpf_distribution_uses_cpf_tag() {
        let cpf = TaxId::new("12345678909").unwrap();
        let q = distribution_query(
            Environment::Production,
            Uf::from_code(35).unwrap(),
            &cpf,
            &DistributionQuery::After(0),
        );
        assert!(q.contains("<CPF>12345678909</CPF>"));
    }
}
