//! Enveloped XML signature verification for SAML messages.
//!
//! Supports exclusive canonicalization (with `InclusiveNamespaces`),
//! RSA-SHA256/384/512 and ECDSA-SHA256/384 signatures and SHA-2 digests.
//! SHA-1 is accepted only when the caller allows it. Keys always come from
//! the configured IdP certificates; `KeyInfo` in the message is ignored.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    hash::{MessageDigest, hash},
    pkey::{Id, PKey, Public},
    sign::Verifier,
    x509::X509,
};
use roxmltree::{Document, Node, NodeId};
use subtle::ConstantTimeEq;

use super::SsoError;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ECDSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

fn invalid(msg: impl Into<String>) -> SsoError {
    SsoError::InvalidSignature(msg.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificates
// ─────────────────────────────────────────────────────────────────────────────

/// Public keys of the IdP signing certificates, in configuration order.
pub struct TrustedKeys {
    keys: Vec<PKey<Public>>,
}

impl TrustedKeys {
    /// Parse one or more concatenated PEM certificates.
    pub fn from_pem(pem: &str) -> Result<Self, SsoError> {
        let certs = X509::stack_from_pem(pem.as_bytes()).map_err(|e| {
            SsoError::ProviderMisconfigured(format!("Invalid IdP certificate: {}", e))
        })?;
        if certs.is_empty() {
            return Err(SsoError::ProviderMisconfigured(
                "No IdP certificate configured".into(),
            ));
        }
        let keys = certs
            .iter()
            .map(|c| c.public_key())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                SsoError::ProviderMisconfigured(format!("Unusable IdP certificate key: {}", e))
            })?;
        Ok(Self { keys })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Algorithms
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Rsa,
    Ec,
}

fn signature_method(uri: &str, allow_sha1: bool) -> Result<(KeyKind, MessageDigest), SsoError> {
    match uri {
        RSA_SHA256 => Ok((KeyKind::Rsa, MessageDigest::sha256())),
        RSA_SHA384 => Ok((KeyKind::Rsa, MessageDigest::sha384())),
        RSA_SHA512 => Ok((KeyKind::Rsa, MessageDigest::sha512())),
        ECDSA_SHA256 => Ok((KeyKind::Ec, MessageDigest::sha256())),
        ECDSA_SHA384 => Ok((KeyKind::Ec, MessageDigest::sha384())),
        RSA_SHA1 if allow_sha1 => Ok((KeyKind::Rsa, MessageDigest::sha1())),
        other => Err(invalid(format!("unsupported signature method {}", other))),
    }
}

fn digest_method(uri: &str, allow_sha1: bool) -> Result<MessageDigest, SsoError> {
    match uri {
        DIGEST_SHA256 => Ok(MessageDigest::sha256()),
        DIGEST_SHA384 => Ok(MessageDigest::sha384()),
        DIGEST_SHA512 => Ok(MessageDigest::sha512()),
        DIGEST_SHA1 if allow_sha1 => Ok(MessageDigest::sha1()),
        other => Err(invalid(format!("unsupported digest method {}", other))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

fn ds_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.has_tag_name((DSIG_NS, name)))
}

fn required_ds_child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Result<Node<'a, 'input>, SsoError> {
    ds_child(node, name).ok_or_else(|| invalid(format!("missing {}", name)))
}

/// The `ds:Signature` element directly under `element`, if any.
pub fn enveloped_signature<'a, 'input>(element: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    ds_child(element, "Signature")
}

/// Prefixes listed by an `InclusiveNamespaces` child of a c14n method or
/// transform. `#default` stands for the default namespace.
fn inclusive_prefixes(method: Node) -> Vec<Option<String>> {
    method
        .children()
        .find(|c| c.is_element() && c.has_tag_name((EXC_C14N, "InclusiveNamespaces")))
        .and_then(|n| n.attribute("PrefixList"))
        .map(|list| {
            list.split_whitespace()
                .map(|p| {
                    if p == "#default" {
                        None
                    } else {
                        Some(p.to_string())
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn text_of(node: Node) -> String {
    node.text()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Verify the enveloped signature of `element` against `keys`.
///
/// The single `Reference` must point at `element` by its `ID`, so a
/// signature can never vouch for a different part of the document.
pub fn verify_enveloped(
    doc: &Document,
    element: Node,
    keys: &TrustedKeys,
    allow_sha1: bool,
) -> Result<(), SsoError> {
    let signature = enveloped_signature(element).ok_or_else(|| invalid("element is not signed"))?;
    let signed_info = required_ds_child(signature, "SignedInfo")?;

    let c14n = required_ds_child(signed_info, "CanonicalizationMethod")?;
    if c14n.attribute("Algorithm") != Some(EXC_C14N) {
        return Err(invalid("unsupported canonicalization method"));
    }
    let sig_method = required_ds_child(signed_info, "SignatureMethod")?;
    let (kind, sig_digest) = signature_method(
        sig_method.attribute("Algorithm").unwrap_or_default(),
        allow_sha1,
    )?;

    let references: Vec<Node> = signed_info
        .children()
        .filter(|c| c.is_element() && c.has_tag_name((DSIG_NS, "Reference")))
        .collect();
    let [reference] = references.as_slice() else {
        return Err(invalid("signature must contain exactly one reference"));
    };

    let element_id = element
        .attribute("ID")
        .ok_or_else(|| invalid("signed element has no ID"))?;
    let uri = reference.attribute("URI").unwrap_or_default();
    if uri.strip_prefix('#') != Some(element_id) {
        return Err(invalid("reference does not point at the signed element"));
    }

    let mut reference_prefixes = Vec::new();
    let mut saw_enveloped = false;
    if let Some(transforms) = ds_child(*reference, "Transforms") {
        for transform in transforms.children().filter(|c| c.is_element()) {
            match transform.attribute("Algorithm") {
                Some(ENVELOPED_SIGNATURE) => saw_enveloped = true,
                Some(EXC_C14N) => reference_prefixes = inclusive_prefixes(transform),
                other => {
                    return Err(invalid(format!(
                        "unsupported transform {}",
                        other.unwrap_or("(none)")
                    )));
                }
            }
        }
    }
    if !saw_enveloped {
        return Err(invalid("reference is missing the enveloped-signature transform"));
    }

    let digest_md = digest_method(
        required_ds_child(*reference, "DigestMethod")?
            .attribute("Algorithm")
            .unwrap_or_default(),
        allow_sha1,
    )?;
    let expected_digest = STANDARD
        .decode(text_of(required_ds_child(*reference, "DigestValue")?))
        .map_err(|_| invalid("digest value is not base64"))?;

    let canonical = canonicalize(doc, element, Some(signature.id()), &reference_prefixes)?;
    let actual_digest = hash(digest_md, canonical.as_bytes())
        .map_err(|e| SsoError::Internal(format!("digest failed: {}", e)))?;
    if !bool::from(actual_digest[..].ct_eq(&expected_digest[..])) {
        return Err(invalid("digest mismatch"));
    }

    let signed_info_c14n = canonicalize(doc, signed_info, None, &inclusive_prefixes(c14n))?;
    let signature_value = STANDARD
        .decode(text_of(required_ds_child(signature, "SignatureValue")?))
        .map_err(|_| invalid("signature value is not base64"))?;

    for key in &keys.keys {
        if verify_with_key(key, kind, sig_digest, signed_info_c14n.as_bytes(), &signature_value)? {
            return Ok(());
        }
    }
    Err(invalid("signature does not verify with any configured certificate"))
}

/// Verify a detached signature, as carried by the HTTP-Redirect binding's
/// `SigAlg`/`Signature` query parameters.
pub fn verify_detached(
    keys: &TrustedKeys,
    sig_alg: &str,
    data: &[u8],
    signature: &[u8],
    allow_sha1: bool,
) -> Result<(), SsoError> {
    let (kind, digest) = signature_method(sig_alg, allow_sha1)?;
    for key in &keys.keys {
        // Redirect-binding ECDSA signatures are DER encoded, not raw r || s
        let mut verifier = Verifier::new(digest, key)
            .map_err(|e| SsoError::Internal(format!("verifier setup failed: {}", e)))?;
        let key_matches = matches!(
            (key.id(), kind),
            (Id::RSA, KeyKind::Rsa) | (Id::EC, KeyKind::Ec)
        );
        if key_matches
            && verifier.update(data).is_ok()
            && verifier.verify(signature).unwrap_or(false)
        {
            return Ok(());
        }
    }
    Err(invalid("redirect signature does not verify with any configured certificate"))
}

fn verify_with_key(
    key: &PKey<Public>,
    kind: KeyKind,
    digest: MessageDigest,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, SsoError> {
    let key_kind = match key.id() {
        Id::RSA => KeyKind::Rsa,
        Id::EC => KeyKind::Ec,
        _ => return Ok(false),
    };
    if key_kind != kind {
        return Ok(false);
    }

    // XML-DSig carries ECDSA signatures as raw r || s; OpenSSL wants DER
    let der;
    let signature = if kind == KeyKind::Ec {
        if signature.is_empty() || signature.len() % 2 != 0 {
            return Ok(false);
        }
        let (r, s) = signature.split_at(signature.len() / 2);
        let parts = BigNum::from_slice(r)
            .and_then(|r| BigNum::from_slice(s).map(|s| (r, s)))
            .and_then(|(r, s)| EcdsaSig::from_private_components(r, s))
            .and_then(|sig| sig.to_der());
        match parts {
            Ok(bytes) => {
                der = bytes;
                der.as_slice()
            }
            Err(_) => return Ok(false),
        }
    } else {
        signature
    };

    let mut verifier = Verifier::new(digest, key)
        .map_err(|e| SsoError::Internal(format!("verifier setup failed: {}", e)))?;
    verifier
        .update(data)
        .map_err(|e| SsoError::Internal(format!("verifier update failed: {}", e)))?;
    Ok(verifier.verify(signature).unwrap_or(false))
}

// ─────────────────────────────────────────────────────────────────────────────
// Exclusive XML canonicalization (without comments)
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace declarations already emitted by output ancestors.
type Rendered = BTreeMap<Option<String>, String>;

/// Canonicalize the subtree at `apex`, leaving out `exclude` and its
/// descendants.
pub fn canonicalize(
    doc: &Document,
    apex: Node,
    exclude: Option<NodeId>,
    inclusive: &[Option<String>],
) -> Result<String, SsoError> {
    let mut out = String::new();
    let c = Canonicalizer {
        input: doc.input_text(),
        exclude,
        inclusive,
    };
    c.node(apex, &Rendered::new(), &mut out)?;
    Ok(out)
}

struct Canonicalizer<'a> {
    input: &'a str,
    exclude: Option<NodeId>,
    inclusive: &'a [Option<String>],
}

impl Canonicalizer<'_> {
    fn node(&self, node: Node, rendered: &Rendered, out: &mut String) -> Result<(), SsoError> {
        if Some(node.id()) == self.exclude {
            return Ok(());
        }
        if node.is_element() {
            self.element(node, rendered, out)
        } else if node.is_text() {
            escape_text(node.text().unwrap_or_default(), out);
            Ok(())
        } else if let Some(pi) = node.pi() {
            out.push_str("<?");
            out.push_str(pi.target);
            if let Some(value) = pi.value {
                out.push(' ');
                out.push_str(value);
            }
            out.push_str("?>");
            Ok(())
        } else {
            // Comments are dropped
            Ok(())
        }
    }

    /// Prefix of an element as written in the source document.
    fn element_prefix<'n>(&self, node: Node<'_, 'n>) -> Option<String> {
        let start = self.input.get(node.range())?;
        let qname: String = start
            .trim_start_matches('<')
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
            .collect();
        qname.split_once(':').map(|(p, _)| p.to_string())
    }

    fn in_scope_uri(node: Node, prefix: Option<&str>) -> Option<String> {
        node.namespaces()
            .find(|ns| ns.name() == prefix)
            .map(|ns| ns.uri().to_string())
    }

    fn attribute_prefix(node: Node, uri: &str) -> Option<String> {
        if uri == "http://www.w3.org/XML/1998/namespace" {
            return Some("xml".to_string());
        }
        node.namespaces()
            .find(|ns| ns.uri() == uri && ns.name().is_some())
            .and_then(|ns| ns.name().map(str::to_string))
    }

    fn element(&self, node: Node, rendered: &Rendered, out: &mut String) -> Result<(), SsoError> {
        let prefix = self.element_prefix(node);
        let qname = match &prefix {
            Some(p) => format!("{}:{}", p, node.tag_name().name()),
            None => node.tag_name().name().to_string(),
        };

        // Attributes with their output prefixes, sorted by (namespace, local)
        let mut attrs: Vec<(String, String, String)> = Vec::new();
        let mut utilized: Vec<Option<String>> = vec![prefix.clone()];
        for attr in node.attributes() {
            let (ns, name) = match attr.namespace() {
                Some(uri) => {
                    let p = Self::attribute_prefix(node, uri).ok_or_else(|| {
                        invalid("attribute namespace has no prefix in scope")
                    })?;
                    if p != "xml" {
                        utilized.push(Some(p.clone()));
                    }
                    (uri.to_string(), format!("{}:{}", p, attr.name()))
                }
                None => (String::new(), attr.name().to_string()),
            };
            attrs.push((ns, name, attr.value().to_string()));
        }
        attrs.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| local_part(&a.1).cmp(local_part(&b.1)))
        });
        utilized.extend(self.inclusive.iter().cloned());

        // Namespace declarations to emit here
        let mut next = rendered.clone();
        let mut decls: BTreeMap<Option<String>, String> = BTreeMap::new();
        for p in utilized {
            if p.as_deref() == Some("xml") || decls.contains_key(&p) {
                continue;
            }
            let uri = match Self::in_scope_uri(node, p.as_deref()) {
                Some(uri) => uri,
                // An unprefixed element outside any default namespace
                None if p.is_none() => String::new(),
                // Inclusive prefixes that are not in scope are ignored
                None => continue,
            };
            let already = rendered.get(&p).map(String::as_str);
            let emit = match (&p, already) {
                (None, None) => !uri.is_empty(),
                (_, Some(prev)) => prev != uri,
                (Some(_), None) => true,
            };
            if emit {
                decls.insert(p.clone(), uri.clone());
                next.insert(p, uri);
            }
        }

        out.push('<');
        out.push_str(&qname);
        // BTreeMap orders None (default namespace) before any prefix
        for (p, uri) in &decls {
            match p {
                None => out.push_str(" xmlns=\""),
                Some(p) => {
                    out.push_str(" xmlns:");
                    out.push_str(p);
                    out.push_str("=\"");
                }
            }
            escape_attr(uri, out);
            out.push('"');
        }
        for (_, name, value) in &attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_attr(value, out);
            out.push('"');
        }
        out.push('>');

        for child in node.children() {
            self.node(child, &next, out)?;
        }

        out.push_str("</");
        out.push_str(&qname);
        out.push('>');
        Ok(())
    }
}

fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map(|(_, l)| l).unwrap_or(qname)
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{test_support::*, *};

    const XML: &str = r#"<root xmlns="urn:default" xmlns:a="urn:a" xmlns:unused="urn:unused"><a:item ID="_1" b="2" a:z="1" xmlns:c="urn:c"><!--SIG--><a:child>x &amp; y</a:child><plain/></a:item></root>"#;

    #[test]
    fn test_canonicalize_exclusive_namespaces() {
        let doc = Document::parse(XML).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let c14n = canonicalize(&doc, item, None, &[]).unwrap();
        assert_eq!(
            c14n,
            r#"<a:item xmlns:a="urn:a" ID="_1" b="2" a:z="1"><a:child>x &amp; y</a:child><plain xmlns="urn:default"></plain></a:item>"#
        );
    }

    #[test]
    fn test_canonicalize_inclusive_prefix_list() {
        let doc = Document::parse(XML).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let c14n = canonicalize(&doc, item, None, &[Some("unused".into())]).unwrap();
        assert!(c14n.starts_with(r#"<a:item xmlns:a="urn:a" xmlns:unused="urn:unused" ID="_1""#));
    }

    #[test]
    fn test_signed_element_verifies() {
        let (key, cert) = generate_rsa_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key);
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&cert).unwrap();
        verify_enveloped(&doc, item, &keys, false).unwrap();
    }

    #[test]
    fn test_ecdsa_signature_verifies() {
        let (key, cert) = generate_ec_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key);
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&cert).unwrap();
        verify_enveloped(&doc, item, &keys, false).unwrap();
    }

    #[test]
    fn test_tampered_content_fails() {
        let (key, cert) = generate_rsa_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key).replace("x &amp; y", "x &amp; z");
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&cert).unwrap();
        let err = verify_enveloped(&doc, item, &keys, false).unwrap_err();
        assert!(matches!(err, SsoError::InvalidSignature(ref m) if m == "digest mismatch"));
    }

    #[test]
    fn test_wrong_certificate_fails() {
        let (key, _) = generate_rsa_cert();
        let (_, other_cert) = generate_rsa_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key);
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&other_cert).unwrap();
        assert!(verify_enveloped(&doc, item, &keys, false).is_err());
    }

    #[test]
    fn test_second_certificate_accepted() {
        let (key, cert) = generate_rsa_cert();
        let (_, old_cert) = generate_rsa_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key);
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_1"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&format!("{}{}", old_cert, cert)).unwrap();
        verify_enveloped(&doc, item, &keys, false).unwrap();
    }

    #[test]
    fn test_reference_must_match_element_id() {
        let (key, cert) = generate_rsa_cert();
        let signed = sign_placeholder(XML, "<!--SIG-->", "_1", &key).replacen(r#"ID="_1""#, r#"ID="_2""#, 1);
        let doc = Document::parse(&signed).unwrap();
        let item = doc
            .descendants()
            .find(|n| n.attribute("ID") == Some("_2"))
            .unwrap();
        let keys = TrustedKeys::from_pem(&cert).unwrap();
        let err = verify_enveloped(&doc, item, &keys, false).unwrap_err();
        assert!(matches!(err, SsoError::InvalidSignature(_)));
    }

    #[test]
    fn test_sha1_rejected_unless_allowed() {
        assert!(signature_method(RSA_SHA1, false).is_err());
        assert!(signature_method(RSA_SHA1, true).is_ok());
        assert!(digest_method(DIGEST_SHA1, false).is_err());
    }

    #[test]
    fn test_invalid_certificate_is_misconfiguration() {
        assert!(matches!(
            TrustedKeys::from_pem("not a cert"),
            Err(SsoError::ProviderMisconfigured(_))
        ));
    }
}
