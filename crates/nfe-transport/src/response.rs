//! # Authority Response Parsing
//!
//! Answers arrive inside a SOAP envelope and a `nfeResultMsg` wrapper. The
//! payload is the first element whose local name starts with `ret`
//! (`retEnviNFe`, `retConsReciNFe`, `retConsStatServ`, `retConsSitNFe`,
//! `retDistDFeInt`). Fields are read from a parsed tree, never by substring
//! search, and only from the direct children of the element that owns them:
//! the `cStat` of a batch and the `cStat` inside each `infProt` are
//! different answers.

use roxmltree::{Document, Node};

use crate::error::ResponseError;

/// The authority's answer to a non-distribution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityResponse {
    /// Local name of the result element, e.g. `retEnviNFe`.
    pub kind: String,
    /// `cStat` of the request.
    pub status: u16,
    /// `xMotivo`, verbatim.
    pub reason: String,
    /// `infRec/nRec` when the batch was accepted for asynchronous processing.
    pub receipt: Option<String>,
    /// `dhRecbto`.
    pub received_at: Option<String>,
    /// One entry per readable `protNFe`, in document order.
    pub protocols: Vec<Protocol>,
    /// `protNFe` elements that could not be read and were skipped.
    pub unreadable_protocols: usize,
}

/// The authority's decision on one document (`protNFe/infProt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    /// `chNFe`.
    pub access_key: Option<String>,
    /// `nProt`, present when authorized.
    pub number: Option<String>,
    /// `cStat` of the document.
    pub status: u16,
    /// `xMotivo`, verbatim.
    pub reason: String,
    /// `dhRecbto`.
    pub received_at: Option<String>,
    /// The `protNFe` element exactly as received, for the processed archive.
    pub xml: String,
}

/// One compressed document of a distribution batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocZip {
    /// Sequence number of the document.
    pub nsu: u64,
    /// Schema tag, e.g. `resNFe_v1.01` or `procNFe_v4.00`.
    pub schema: String,
    /// Base64 of the gzipped XML.
    pub content: String,
}

/// The answer to a `distDFeInt` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionBatch {
    /// `cStat`.
    pub status: u16,
    /// `xMotivo`, verbatim.
    pub reason: String,
    /// `ultNSU`: the last NSU returned.
    pub last_nsu: Option<u64>,
    /// `maxNSU`: the highest NSU available.
    pub max_nsu: Option<u64>,
    /// Readable `loteDistDFeInt/docZip` entries, in document order.
    pub documents: Vec<DocZip>,
    /// `docZip` entries without a usable `NSU` or `schema`, skipped.
    pub unreadable_documents: usize,
}

/// Parse an authorization, receipt, status or protocol answer.
pub fn parse_response(body: &str) -> Result<AuthorityResponse, ResponseError> {
    let doc = parse_document(body)?;
    let result = result_element(&doc)?;

    let (protocols, unreadable_protocols) = lenient(
        result
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "protNFe")
            .map(|prot| parse_protocol(body, prot)),
        "protNFe",
    );

    Ok(AuthorityResponse {
        kind: result.tag_name().name().to_string(),
        status: status_of(result)?,
        reason: child_text(result, "xMotivo").unwrap_or_default(),
        receipt: child(result, "infRec").and_then(|rec| child_text(rec, "nRec")),
        received_at: child_text(result, "dhRecbto"),
        protocols,
        unreadable_protocols,
    })
}

/// Parse a distribution answer.
pub fn parse_distribution(body: &str) -> Result<DistributionBatch, ResponseError> {
    let doc = parse_document(body)?;
    let result = result_element(&doc)?;

    let (documents, unreadable_documents) = match child(result, "loteDistDFeInt") {
        Some(batch) => lenient(
            batch
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "docZip")
                .map(parse_doc_zip),
            "docZip",
        ),
        None => (Vec::new(), 0),
    };

    Ok(DistributionBatch {
        status: status_of(result)?,
        reason: child_text(result, "xMotivo").unwrap_or_default(),
        last_nsu: child_text(result, "ultNSU")
            .map(|v| parse_nsu(&v))
            .transpose()?,
        max_nsu: child_text(result, "maxNSU")
            .map(|v| parse_nsu(&v))
            .transpose()?,
        documents,
        unreadable_documents,
    })
}

/// Keep the readable entries of a repeated element and count the rest. One
/// broken entry never hides its siblings.
fn lenient<T>(
    entries: impl Iterator<Item = Result<T, ResponseError>>,
    element: &'static str,
) -> (Vec<T>, usize) {
    let mut kept = Vec::new();
    let mut skipped = 0;
    for entry in entries {
        match entry {
            Ok(value) => kept.push(value),
            Err(err) => {
                tracing::warn!(element, error = %err, "skipping unreadable element");
                skipped += 1;
            }
        }
    }
    (kept, skipped)
}

fn parse_document(body: &str) -> Result<Document<'_>, ResponseError> {
    Document::parse(body).map_err(|e| ResponseError::Malformed(e.to_string()))
}

fn result_element<'a, 'input>(
    doc: &'a Document<'input>,
) -> Result<Node<'a, 'input>, ResponseError> {
    if let Some(found) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name().starts_with("ret"))
    {
        return Ok(found);
    }
    match doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Fault")
    {
        Some(fault) => {
            let text: String = fault
                .descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Err(ResponseError::Malformed(format!("SOAP fault: {text}")))
        }
        None => Err(ResponseError::MissingField("result element")),
    }
}

fn parse_protocol(body: &str, prot: Node<'_, '_>) -> Result<Protocol, ResponseError> {
    let info = child(prot, "infProt").ok_or(ResponseError::MissingField("infProt"))?;
    let xml = body
        .get(prot.range())
        .ok_or_else(|| ResponseError::Malformed("protNFe span out of bounds".into()))?
        .to_string();
    Ok(Protocol {
        access_key: child_text(info, "chNFe"),
        number: child_text(info, "nProt"),
        status: status_of(info)?,
        reason: child_text(info, "xMotivo").unwrap_or_default(),
        received_at: child_text(info, "dhRecbto"),
        xml,
    })
}

fn parse_doc_zip(node: Node<'_, '_>) -> Result<DocZip, ResponseError> {
    let nsu = node
        .attribute("NSU")
        .ok_or(ResponseError::MissingField("docZip/@NSU"))?;
    Ok(DocZip {
        nsu: parse_nsu(nsu)?,
        schema: node
            .attribute("schema")
            .ok_or(ResponseError::MissingField("docZip/@schema"))?
            .to_string(),
        content: node.text().map(str::trim).unwrap_or_default().to_string(),
    })
}

fn status_of(node: Node<'_, '_>) -> Result<u16, ResponseError> {
    let raw = child_text(node, "cStat").ok_or(ResponseError::MissingField("cStat"))?;
    raw.parse()
        .map_err(|_| ResponseError::Malformed(format!("non-numeric cStat {raw:?}")))
}

fn parse_nsu(raw: &str) -> Result<u64, ResponseError> {
    raw.trim()
        .parse()
        .map_err(|_| ResponseError::Malformed(format!("non-numeric NSU {raw:?}")))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soap(inner: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body>\
             <nfeResultMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4\">{inner}</nfeResultMsg>\
             </soap:Body></soap:Envelope>"
        )
    }

    #[test]
    fn pending_receipt() {
        let body = soap(
            "<retEnviNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\">\
             <tpAmb>2</tpAmb><cStat>103</cStat><xMotivo>Lote recebido com sucesso</xMotivo>\
             <cUF>43</cUF><dhRecbto>2026-02-10T10:00:00-03:00</dhRecbto>\
             <infRec><nRec>431000012345678</nRec><tMed>1</tMed></infRec></retEnviNFe>",
        );
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.kind, "retEnviNFe");
        assert_eq!(resp.status, 103);
        assert_eq!(resp.reason, "Lote recebido com sucesso");
        assert_eq!(resp.receipt.as_deref(), Some("431000012345678"));
        assert!(resp.protocols.is_empty());
    }

    #[test]
    fn batch_and_document_status_are_distinct() {
        let body = soap(
            "<retConsReciNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\">\
             <cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe versao=\"4.00\"><infProt><chNFe>43260212345678000190550010000000011123456789</chNFe>\
             <dhRecbto>2026-02-10T10:00:01-03:00</dhRecbto><nProt>143260000000001</nProt>\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe>\
             <protNFe versao=\"4.00\"><infProt><chNFe>43260212345678000190550010000000021123456780</chNFe>\
             <cStat>204</cStat><xMotivo>Rejeicao: Duplicidade de NF-e</xMotivo></infProt></protNFe>\
             </retConsReciNFe>",
        );
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.status, 104);
        assert_eq!(resp.protocols.len(), 2);
        let first = &resp.protocols[0];
        assert_eq!(first.status, 100);
        assert_eq!(first.number.as_deref(), Some("143260000000001"));
        assert!(first.xml.starts_with("<protNFe versao=\"4.00\"><infProt>"));
        assert!(first.xml.ends_with("</protNFe>"));
        assert_eq!(resp.protocols[1].status, 204);
        assert_eq!(resp.protocols[1].number, None);
        assert_eq!(resp.protocols[1].reason, "Rejeicao: Duplicidade de NF-e");
    }

    #[test]
    fn unwrapped_result_is_accepted() {
        let resp = parse_response(
            "<retConsStatServ versao=\"4.00\"><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo></retConsStatServ>",
        )
        .unwrap();
        assert_eq!(resp.status, 107);
    }

    #[test]
    fn soap_fault_is_reported() {
        let body = "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body>\
                    <soap:Fault><soap:Reason><soap:Text>Server was unable to process request</soap:Text></soap:Reason></soap:Fault>\
                    </soap:Body></soap:Envelope>";
        match parse_response(body) {
            Err(ResponseError::Malformed(msg)) => {
                assert!(msg.contains("Server was unable to process request"))
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn missing_status_and_garbage() {
        assert_eq!(
            parse_response("<retEnviNFe><xMotivo>x</xMotivo></retEnviNFe>"),
            Err(ResponseError::MissingField("cStat"))
        );
        assert!(matches!(
            parse_response("<retEnviNFe><cStat>abc</cStat></retEnviNFe>"),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            parse_response("<html>502 Bad Gateway"),
            Err(ResponseError::Malformed(_))
        ));
        assert_eq!(
            parse_response("<html><body>oops</body></html>"),
            Err(ResponseError::MissingField("result element"))
        );
    }

    #[test]
    fn distribution_batch() {
        let body = soap(
            "<retDistDFeInt xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"1.01\">\
             <tpAmb>1</tpAmb><cStat>138</cStat><xMotivo>Documento localizado</xMotivo>\
             <dhResp>2026-02-10T10:00:00-03:00</dhResp>\
             <ultNSU>000000000000012</ultNSU><maxNSU>000000000000020</maxNSU>\
             <loteDistDFeInt>\
             <docZip NSU=\"000000000000011\" schema=\"resNFe_v1.01\">H4sIAAAA</docZip>\
             <docZip NSU=\"000000000000012\" schema=\"procNFe_v4.00\">\n  H4sIBBBB\n</docZip>\
             </loteDistDFeInt></retDistDFeInt>",
        );
        let batch = parse_distribution(&body).unwrap();
        assert_eq!(batch.status, 138);
        assert_eq!(batch.last_nsu, Some(12));
        assert_eq!(batch.max_nsu, Some(20));
        assert_eq!(batch.documents.len(), 2);
        assert_eq!(batch.documents[0].nsu, 11);
        assert_eq!(batch.documents[0].schema, "resNFe_v1.01");
        assert_eq!(batch.documents[1].content, "H4sIBBBB");
    }

    #[test]
    fn empty_distribution() {
        let batch = parse_distribution(
            "<retDistDFeInt><cStat>137</cStat><xMotivo>Nenhum documento localizado</xMotivo>\
             <ultNSU>000000000000020</ultNSU><maxNSU>000000000000020</maxNSU></retDistDFeInt>",
        )
        .unwrap();
        assert_eq!(batch.status, 137);
        assert_eq!(batch.max_nsu, Some(20));
        assert!(batch.documents.is_empty());
    }

    #[test]
    fn broken_doc_zip_does_not_hide_siblings() {
        let batch = parse_distribution(
            "<retDistDFeInt><cStat>138</cStat><xMotivo>Documento localizado</xMotivo>\
             <ultNSU>000000000000003</ultNSU><maxNSU>000000000000003</maxNSU><loteDistDFeInt>\
             <docZip NSU=\"000000000000001\" schema=\"resNFe_v1.01\">AAAA</docZip>\
             <docZip NSU=\"x2\" schema=\"resNFe_v1.01\">BBBB</docZip>\
             <docZip schema=\"resNFe_v1.01\">CCCC</docZip>\
             <docZip NSU=\"000000000000003\">DDDD</docZip>\
             </loteDistDFeInt></retDistDFeInt>",
        )
        .unwrap();
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].nsu, 1);
        assert_eq!(batch.documents[0].content, "AAAA");
        assert_eq!(batch.unreadable_documents, 3);
        assert_eq!(batch.max_nsu, Some(3));
    }

    #[test]
    fn broken_protocol_does_not_hide_siblings() {
        let body = soap(
            "<retConsReciNFe><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe versao=\"4.00\"><infProt><chNFe>43260212345678000190550010000000011123456789</chNFe>\
             <cStat>abc</cStat></infProt></protNFe>\
             <protNFe versao=\"4.00\"><chNFe>sem infProt</chNFe></protNFe>\
             <protNFe versao=\"4.00\"><infProt><chNFe>43260212345678000190550010000000021123456780</chNFe>\
             <nProt>143260000000002</nProt><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>\
             </infProt></protNFe></retConsReciNFe>",
        );
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.status, 104);
        assert_eq!(resp.protocols.len(), 1);
        assert_eq!(resp.protocols[0].number.as_deref(), Some("143260000000002"));
        assert_eq!(resp.unreadable_protocols, 2);
    }
}
