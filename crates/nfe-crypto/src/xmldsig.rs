//! # Enveloped XML Signature Engine
//!
//! Signs the element whose `Id` attribute starts with a given prefix
//! (`infNFe` → `NFe…`, events → `ID…`) and inserts a `Signature` element
//! right after it, in the layout the tax authority validates.
//!
//! ```text
//! <Signature xmlns="http://www.w3.org/2000/09/xmldsig#">
//!   <SignedInfo>            C14N, RSA-SHA256, Reference URI="#<Id>"
//!   <SignatureValue>        RSA PKCS#1 v1.5 over canonical SignedInfo
//!   <KeyInfo><X509Data><X509Certificate>
//! </Signature>
//! ```
//!
//! ## Canonicalization
//!
//! [`canonicalize()`] is a deliberately small subset of C14N: it strips XML
//! declarations, normalizes line endings, drops whitespace between tags,
//! rewrites single-quoted attribute values with double quotes, and trims.
//! The documents produced by the builder are already in canonical shape
//! (no comments, no namespace redeclarations, attributes in schema order),
//! and on those inputs the subset agrees with full C14N.
//!
//! ## Element location
//!
//! Elements are located on a parsed tree (`roxmltree`); their serialized
//! form is the exact source byte span of the node, so the digest covers the
//! bytes that are transmitted.

use std::ops::Range;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nfe_core::ValidationError;
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::{Digest, Sha256};

use crate::credential::{certificate_public_key, Credential};
use crate::error::SignatureError;

/// XML-DSig namespace.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// Canonical XML 1.0 (inclusive, without comments).
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// Enveloped-signature transform.
pub const ENVELOPED_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// RSA PKCS#1 v1.5 with SHA-256.
pub const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// SHA-256 digest.
pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Sign the element whose `Id` starts with `reference_id_prefix`.
pub fn sign(
    xml: &str,
    credential: &Credential,
    reference_id_prefix: &str,
) -> Result<String, SignatureError> {
    let doc = parse(xml)?;
    let target = doc
        .descendants()
        .find(|n| {
            n.is_element()
                && n.attribute("Id")
                    .is_some_and(|id| id.starts_with(reference_id_prefix))
        })
        .ok_or_else(|| ValidationError::SignatureReferenceNotFound(reference_id_prefix.into()))?;
    let id = target.attribute("Id").unwrap_or_default().to_string();
    let span = element_span(xml, target.range())?;

    let digest_value = digest(&canonicalize(&xml[span.clone()]));
    let signed_info = signed_info(&id, &digest_value, false);
    let to_sign = canonicalize(&signed_info_qualified(&signed_info));

    let signing_key = SigningKey::<Sha256>::new(credential.private_key().clone());
    let signature = signing_key
        .try_sign(to_sign.as_bytes())
        .map_err(|e| SignatureError::Signing(e.to_string()))?;

    let block = format!(
        "<Signature xmlns=\"{DSIG_NS}\">{signed_info}<SignatureValue>{}</SignatureValue>\
         <KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo></Signature>",
        STANDARD.encode(signature.to_bytes()),
        credential.certificate_base64(),
    );

    let name = tag_name(xml, span.start);
    let closing = format!("</{name}>");
    let at = if xml[..span.end].ends_with(&closing) {
        span.end
    } else {
        root_closing_offset(xml)?
    };

    tracing::debug!(id = %id, "element signed");
    let mut out = String::with_capacity(xml.len() + block.len());
    out.push_str(&xml[..at]);
    out.push_str(&block);
    out.push_str(&xml[at..]);
    Ok(out)
}

/// Recompute the reference digest of a signed document.
///
/// Returns `false` for anything malformed: no signature, no reference, an
/// unparsable document, or a digest mismatch.
pub fn verify(signed_xml: &str) -> bool {
    check_digest(signed_xml).unwrap_or(false)
}

/// [`verify()`] plus a check of `SignatureValue` against the public key of
/// the embedded certificate.
pub fn verify_signature_value(signed_xml: &str) -> bool {
    verify(signed_xml) && check_signature_value(signed_xml).unwrap_or(false)
}

/// The simplified canonical form used for both digests.
pub fn canonicalize(xml: &str) -> String {
    let without_decl = strip_declarations(xml);
    let normalized = without_decl.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = collapse_inter_tag_whitespace(&normalized);
    double_quote_attributes(&collapsed).trim().to_string()
}

/// Base64 of the SHA-256 of `canonical`.
pub fn digest(canonical: &str) -> String {
    STANDARD.encode(Sha256::digest(canonical.as_bytes()))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

fn check_digest(signed_xml: &str) -> Result<bool, SignatureError> {
    let doc = parse(signed_xml)?;
    let Some(signature) = find_local(&doc, "Signature") else {
        return Ok(false);
    };
    let Some(expected) = signature
        .descendants()
        .find(|n| is_local(n, "DigestValue"))
        .and_then(|n| n.text())
    else {
        return Ok(false);
    };
    let Some(id) = signature
        .descendants()
        .find(|n| is_local(n, "Reference"))
        .and_then(|n| n.attribute("URI"))
        .and_then(|uri| uri.strip_prefix('#'))
    else {
        return Ok(false);
    };
    let expected = expected.trim().to_string();
    let id = id.to_string();

    let sig_span = element_span(signed_xml, signature.range())?;
    let stripped = format!("{}{}", &signed_xml[..sig_span.start], &signed_xml[sig_span.end..]);

    let doc = parse(&stripped)?;
    let Some(target) = doc
        .descendants()
        .find(|n| n.is_element() && n.attribute("Id") == Some(id.as_str()))
    else {
        return Ok(false);
    };
    let span = element_span(&stripped, target.range())?;
    Ok(digest(&canonicalize(&stripped[span])) == expected)
}

fn check_signature_value(signed_xml: &str) -> Result<bool, SignatureError> {
    let doc = parse(signed_xml)?;
    let Some(signature) = find_local(&doc, "Signature") else {
        return Ok(false);
    };
    let child_text = |name: &str| {
        signature
            .descendants()
            .find(|n| is_local(n, name))
            .and_then(|n| n.text())
            .map(|t| t.chars().filter(|c| !c.is_whitespace()).collect::<String>())
    };
    let (Some(value), Some(certificate)) = (child_text("SignatureValue"), child_text("X509Certificate"))
    else {
        return Ok(false);
    };
    let Some(info) = signature.descendants().find(|n| is_local(n, "SignedInfo")) else {
        return Ok(false);
    };
    let info_span = element_span(signed_xml, info.range())?;
    let canonical = canonicalize(&signed_info_qualified(&signed_xml[info_span]));

    let (Ok(signature_bytes), Ok(certificate_der)) =
        (STANDARD.decode(value), STANDARD.decode(certificate))
    else {
        return Ok(false);
    };
    let Ok(public_key) = certificate_public_key(&certificate_der) else {
        return Ok(false);
    };
    let Ok(rsa_signature) = RsaSignature::try_from(signature_bytes.as_slice()) else {
        return Ok(false);
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    Ok(verifying_key
        .verify(canonical.as_bytes(), &rsa_signature)
        .is_ok())
}

// ---------------------------------------------------------------------------
// SignedInfo
// ---------------------------------------------------------------------------

fn signed_info(id: &str, digest_value: &str, qualified: bool) -> String {
    let open = if qualified {
        format!("<SignedInfo xmlns=\"{DSIG_NS}\">")
    } else {
        "<SignedInfo>".to_string()
    };
    format!(
        "{open}\
         <CanonicalizationMethod Algorithm=\"{C14N_ALGORITHM}\"></CanonicalizationMethod>\
         <SignatureMethod Algorithm=\"{RSA_SHA256_ALGORITHM}\"></SignatureMethod>\
         <Reference URI=\"#{id}\">\
         <Transforms>\
         <Transform Algorithm=\"{ENVELOPED_TRANSFORM}\"></Transform>\
         <Transform Algorithm=\"{C14N_ALGORITHM}\"></Transform>\
         </Transforms>\
         <DigestMethod Algorithm=\"{SHA256_ALGORITHM}\"></DigestMethod>\
         <DigestValue>{digest_value}</DigestValue>\
         </Reference>\
         </SignedInfo>"
    )
}

/// The `SignedInfo` as it is canonicalized for signing: inside `Signature`
/// it inherits the dsig default namespace, so the standalone form carries it.
fn signed_info_qualified(signed_info: &str) -> String {
    match signed_info.strip_prefix("<SignedInfo>") {
        Some(rest) => format!("<SignedInfo xmlns=\"{DSIG_NS}\">{rest}"),
        None => signed_info.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn parse(xml: &str) -> Result<roxmltree::Document<'_>, ValidationError> {
    roxmltree::Document::parse(xml).map_err(|e| ValidationError::MalformedXml(e.to_string()))
}

fn is_local(node: &roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn find_local<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    doc.descendants().find(|n| is_local(n, name))
}

/// Qualified tag name of the element starting at `start` (`<name ...`).
fn tag_name(xml: &str, start: usize) -> &str {
    let rest = &xml[start + 1..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Byte span of an element from `<` to the end of its closing tag.
///
/// The parser's node range is trusted when it ends on the element's own
/// closing tag (or `/>`); otherwise the closing tag is searched forward.
fn element_span(xml: &str, range: Range<usize>) -> Result<Range<usize>, ValidationError> {
    if range.start >= xml.len() || !xml[range.start..].starts_with('<') {
        return Err(ValidationError::MalformedXml(format!(
            "no element starts at offset {}",
            range.start
        )));
    }
    let name = tag_name(xml, range.start);
    let closing = format!("</{name}>");
    let end = range.end.min(xml.len());
    let candidate = &xml[range.start..end];
    if candidate.ends_with(&closing) || candidate.ends_with("/>") {
        return Ok(range.start..end);
    }
    xml[range.start..]
        .find(&closing)
        .map(|pos| range.start..range.start + pos + closing.len())
        .ok_or_else(|| ValidationError::MalformedXml(format!("unterminated element <{name}>")))
}

/// Offset of the outermost element's closing tag.
fn root_closing_offset(xml: &str) -> Result<usize, ValidationError> {
    let trimmed_end = xml.trim_end().len();
    xml[..trimmed_end]
        .rfind("</")
        .ok_or_else(|| ValidationError::MalformedXml("document has no closing root tag".into()))
}

fn strip_declarations(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(start) = rest.find("<?xml") {
        out.push_str(&rest[..start]);
        match rest[start..].find("?>") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn collapse_inter_tag_whitespace(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut pending = String::new();
    let mut after_tag = false;
    for c in xml.chars() {
        if after_tag && c.is_whitespace() {
            pending.push(c);
            continue;
        }
        if c != '<' {
            out.push_str(&pending);
        }
        pending.clear();
        out.push(c);
        after_tag = c == '>';
    }
    out.push_str(&pending);
    out
}

fn double_quote_attributes(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut in_tag = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut prev = '\0';
    for c in xml.chars() {
        match c {
            '<' if !in_single && !in_double => in_tag = true,
            '>' if !in_single && !in_double => in_tag = false,
            _ => {}
        }
        if in_single {
            match c {
                '\'' => {
                    in_single = false;
                    out.push('"');
                }
                '"' => out.push_str("&quot;"),
                _ => out.push(c),
            }
        } else if in_tag && c == '\'' && !in_double && prev == '=' {
            in_single = true;
            out.push('"');
        } else {
            if in_tag && c == '"' {
                in_double = !in_double;
            }
            out.push(c);
        }
        prev = c;
    }
    out
}
