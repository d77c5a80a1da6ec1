//! SAML 2.0 Service Provider.
//!
//! This module implements SP-initiated SSO for one organization's IdP:
//! - AuthnRequest generation (HTTP-Redirect binding, optionally signed)
//! - Response/Assertion validation (see [`validate_response`])
//! - LogoutRequest generation and IdP-initiated LogoutRequest parsing
//! - SP metadata
//!
//! Nothing here is cached: an [`IdentityProvider`] is built from the provider
//! row fetched for the current request.

use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    sign::Signer,
};
use roxmltree::{Document, Node};
use samael::{metadata::EntityDescriptor, service_provider::ServiceProviderBuilder};
use uuid::Uuid;

use super::{
    SsoError,
    attributes::{ClaimBag, SubjectInfo},
    state::RelayState,
    xmldsig::{self, ECDSA_SHA256, RSA_SHA256, TrustedKeys},
};
use crate::{config::SsoConfig, models::SamlProviderConfig};

pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
const HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

// ─────────────────────────────────────────────────────────────────────────────
// Service Provider
// ─────────────────────────────────────────────────────────────────────────────

/// This deployment's SP identity, derived from configuration.
pub struct ServiceProvider {
    pub entity_id: String,
    pub acs_url: String,
    pub slo_url: String,
    signing_key: Option<PKey<Private>>,
    certificate_pem: Option<String>,
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("entity_id", &self.entity_id)
            .field("acs_url", &self.acs_url)
            .field("signs_requests", &self.signing_key.is_some())
            .finish()
    }
}

impl ServiceProvider {
    pub fn from_config(config: &SsoConfig) -> Result<Self, SsoError> {
        let (signing_key, certificate_pem) = match &config.signing {
            Some(signing) => {
                let key = PKey::private_key_from_pem(signing.private_key_pem.as_bytes())
                    .map_err(|e| {
                        SsoError::ProviderMisconfigured(format!(
                            "Failed to parse SP private key (expected PEM format): {}",
                            e
                        ))
                    })?;
                (Some(key), Some(signing.certificate_pem.clone()))
            }
            None => (None, None),
        };

        Ok(Self {
            entity_id: config.sp_entity_id(),
            acs_url: config.acs_url(),
            slo_url: config.slo_url(),
            signing_key,
            certificate_pem,
        })
    }

    pub fn signs_requests(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign an HTTP-Redirect binding URL: `SigAlg` is appended, then the
    /// query string as it stands is signed and `Signature` appended.
    fn sign_redirect_url(&self, mut url: url::Url) -> Result<url::Url, SsoError> {
        let Some(private_key) = &self.signing_key else {
            return Ok(url);
        };

        let sig_alg = if private_key.ec_key().is_ok() {
            ECDSA_SHA256
        } else {
            RSA_SHA256
        };
        url.query_pairs_mut().append_pair("SigAlg", sig_alg);

        let query = url
            .query()
            .ok_or_else(|| SsoError::Internal("No query string to sign".into()))?
            .to_string();

        let mut signer = Signer::new(MessageDigest::sha256(), private_key)
            .map_err(|e| SsoError::Internal(format!("Failed to create signer: {}", e)))?;
        signer
            .update(query.as_bytes())
            .map_err(|e| SsoError::Internal(format!("Failed to update signer: {}", e)))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| SsoError::Internal(format!("Failed to sign: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("Signature", &STANDARD.encode(signature));
        Ok(url)
    }

    /// SP metadata document for IdP configuration.
    pub fn metadata(&self, name_id_format: Option<&str>) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="{}" WantAssertionsSigned="true" protocolSupportEnumeration="{}">"#,
            xml_escape(&self.entity_id),
            self.signs_requests(),
            PROTOCOL_NS
        );

        if let Some(cert) = &self.certificate_pem {
            xml.push_str(&format!(
                r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
                strip_pem_headers(cert)
            ));
        }

        xml.push_str(&format!(
            r#"
    <md:SingleLogoutService Binding="{}" Location="{}"/>
    <md:SingleLogoutService Binding="{}" Location="{}"/>
    <md:NameIDFormat>{}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{}" Location="{}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            HTTP_REDIRECT,
            xml_escape(&self.slo_url),
            HTTP_POST,
            xml_escape(&self.slo_url),
            xml_escape(name_id_format.unwrap_or(DEFAULT_NAME_ID_FORMAT)),
            HTTP_POST,
            xml_escape(&self.acs_url),
        ));
        xml
    }
}

fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .collect::<Vec<_>>()
        .join("")
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity Provider
// ─────────────────────────────────────────────────────────────────────────────

/// One organization's IdP, as configured on its provider row.
pub struct IdentityProvider<'a> {
    pub config: &'a SamlProviderConfig,
}

/// Redirect URL plus the values the caller must remember.
#[derive(Debug, Clone)]
pub struct AuthnRequestRedirect {
    pub url: String,
    pub request_id: String,
    pub relay_state: RelayState,
}

impl<'a> IdentityProvider<'a> {
    pub fn new(config: &'a SamlProviderConfig) -> Self {
        Self { config }
    }

    fn name_id_format(&self) -> &str {
        if self.config.name_id_format.is_empty() {
            DEFAULT_NAME_ID_FORMAT
        } else {
            &self.config.name_id_format
        }
    }

    /// samael needs IdP metadata to build requests; synthesize it from the
    /// provider row.
    fn entity_descriptor(&self) -> Result<EntityDescriptor, SsoError> {
        let certificates: String = self
            .config
            .certificate
            .split("-----END CERTIFICATE-----")
            .map(strip_pem_headers)
            .filter(|c| !c.trim().is_empty())
            .map(|c| {
                format!(
                    r#"<md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>"#,
                    c.trim()
                )
            })
            .collect();

        let slo = self
            .config
            .slo_url
            .as_ref()
            .map(|url| {
                format!(
                    r#"<md:SingleLogoutService Binding="{}" Location="{}"/>"#,
                    HTTP_REDIRECT,
                    xml_escape(url)
                )
            })
            .unwrap_or_default();

        let xml = format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}"><md:IDPSSODescriptor protocolSupportEnumeration="{}">{}{}<md:SingleSignOnService Binding="{}" Location="{}"/></md:IDPSSODescriptor></md:EntityDescriptor>"#,
            xml_escape(&self.config.entity_id),
            PROTOCOL_NS,
            certificates,
            slo,
            HTTP_REDIRECT,
            xml_escape(&self.config.sso_url),
        );

        samael::metadata::de::from_str(&xml).map_err(|e| {
            SsoError::ProviderMisconfigured(format!("Failed to build IdP metadata: {}", e))
        })
    }

    /// Build the AuthnRequest redirect for a login into `organization_slug`.
    pub fn authn_request(
        &self,
        sp: &ServiceProvider,
        organization_slug: &str,
    ) -> Result<AuthnRequestRedirect, SsoError> {
        let service_provider = ServiceProviderBuilder::default()
            .entity_id(sp.entity_id.clone())
            .acs_url(sp.acs_url.clone())
            .idp_metadata(self.entity_descriptor()?)
            .authn_name_id_format(self.name_id_format().to_string())
            .build()
            .map_err(|e| SsoError::Internal(format!("Failed to build ServiceProvider: {}", e)))?;

        let authn_request = service_provider
            .make_authentication_request(&self.config.sso_url)
            .map_err(|e| SsoError::Internal(format!("Failed to create AuthnRequest: {}", e)))?;

        let request_id = authn_request.id.clone();
        let relay_state = RelayState::new(organization_slug);
        let encoded_relay = relay_state.encode()?;

        let url = match &sp.signing_key {
            Some(private_key) => authn_request
                .signed_redirect(&encoded_relay, private_key.clone())
                .map_err(|e| SsoError::Internal(format!("Failed to sign AuthnRequest: {}", e)))?,
            None => authn_request
                .redirect(&encoded_relay)
                .map_err(|e| SsoError::Internal(format!("Failed to encode AuthnRequest: {}", e)))?,
        }
        .ok_or_else(|| SsoError::ProviderMisconfigured("AuthnRequest has no destination".into()))?;

        Ok(AuthnRequestRedirect {
            url: url.to_string(),
            request_id,
            relay_state,
        })
    }

    /// SP-initiated single logout. `None` when the IdP has no SLO endpoint.
    pub fn logout_request_url(
        &self,
        sp: &ServiceProvider,
        name_id: &str,
        session_index: Option<&str>,
        relay_state: Option<&str>,
    ) -> Result<Option<String>, SsoError> {
        use samael::{
            schema::{Issuer, LogoutRequest, NameID},
            traits::ToXml,
        };

        let Some(slo_url) = &self.config.slo_url else {
            return Ok(None);
        };

        let logout_request = LogoutRequest {
            id: Some(format!("_logout_{}", Uuid::new_v4())),
            version: Some("2.0".to_string()),
            issue_instant: Some(Utc::now()),
            destination: Some(slo_url.clone()),
            issuer: Some(Issuer {
                value: Some(sp.entity_id.clone()),
                ..Default::default()
            }),
            name_id: Some(NameID {
                value: name_id.to_string(),
                format: Some(self.name_id_format().to_string()),
            }),
            session_index: session_index.map(str::to_string),
            signature: None,
        };

        let xml = logout_request.to_string().map_err(|e| {
            SsoError::Internal(format!("Failed to serialize LogoutRequest: {:?}", e))
        })?;
        let url = redirect_binding_url(slo_url, "SAMLRequest", &xml, relay_state)?;
        Ok(Some(sp.sign_redirect_url(url)?.to_string()))
    }

    /// LogoutResponse for an IdP-initiated logout. `None` when the IdP has no
    /// SLO endpoint to send it to.
    pub fn logout_response_url(
        &self,
        sp: &ServiceProvider,
        in_response_to: &str,
        relay_state: Option<&str>,
    ) -> Result<Option<String>, SsoError> {
        let Some(slo_url) = &self.config.slo_url else {
            return Ok(None);
        };

        let xml = format!(
            r#"<samlp:LogoutResponse xmlns:samlp="{}" xmlns:saml="{}" ID="_{}" Version="2.0" IssueInstant="{}" Destination="{}" InResponseTo="{}"><saml:Issuer>{}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status></samlp:LogoutResponse>"#,
            PROTOCOL_NS,
            ASSERTION_NS,
            Uuid::new_v4().simple(),
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            xml_escape(slo_url),
            xml_escape(in_response_to),
            xml_escape(&sp.entity_id),
            STATUS_SUCCESS,
        );
        let url = redirect_binding_url(slo_url, "SAMLResponse", &xml, relay_state)?;
        Ok(Some(sp.sign_redirect_url(url)?.to_string()))
    }
}

/// DEFLATE, base64 and attach a message to an HTTP-Redirect binding URL.
fn redirect_binding_url(
    endpoint: &str,
    param: &str,
    xml: &str,
    relay_state: Option<&str>,
) -> Result<url::Url, SsoError> {
    let mut compressed = vec![];
    {
        let mut encoder = DeflateEncoder::new(&mut compressed, Compression::default());
        encoder
            .write_all(xml.as_bytes())
            .map_err(|e| SsoError::Internal(format!("Failed to compress {}: {}", param, e)))?;
        encoder
            .finish()
            .map_err(|e| SsoError::Internal(format!("Failed to compress {}: {}", param, e)))?;
    }

    let mut url = url::Url::parse(endpoint).map_err(|e| {
        SsoError::ProviderMisconfigured(format!("Invalid IdP SLO URL '{}': {}", endpoint, e))
    })?;
    url.query_pairs_mut()
        .append_pair(param, &STANDARD.encode(&compressed));
    if let Some(relay) = relay_state.filter(|r| !r.is_empty()) {
        url.query_pairs_mut().append_pair("RelayState", relay);
    }
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Validation
// ─────────────────────────────────────────────────────────────────────────────

/// What a response must match to be accepted.
#[derive(Debug, Clone)]
pub struct ResponseExpectations<'a> {
    pub sp_entity_id: &'a str,
    pub acs_url: &'a str,
    /// AuthnRequest ID carried in the relay state.
    pub request_id: &'a str,
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
    pub allow_sha1: bool,
}

/// Data read from a verified assertion.
#[derive(Debug, Clone)]
pub struct ValidatedAssertion {
    pub issuer: String,
    pub name_id: String,
    pub session_index: Option<String>,
    pub claims: ClaimBag,
}

impl ValidatedAssertion {
    pub fn subject(&self) -> SubjectInfo {
        SubjectInfo {
            external_id: self.name_id.clone(),
            name_id: Some(self.name_id.clone()),
            session_index: self.session_index.clone(),
        }
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, ns: &str, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.has_tag_name((ns, name)))
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &'a str,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a
where
    'input: 'a,
{
    node.children()
        .filter(move |c| c.is_element() && c.has_tag_name((ns, name)))
}

fn element_text(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_instant(value: &str, what: &str) -> Result<DateTime<Utc>, SsoError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SsoError::InvalidResponse(format!("invalid {} timestamp", what)))
}

fn check_window(node: Node, expect: &ResponseExpectations, what: &str) -> Result<(), SsoError> {
    if let Some(not_before) = node.attribute("NotBefore") {
        let not_before = parse_instant(not_before, what)?;
        if expect.now + expect.clock_skew < not_before {
            return Err(SsoError::AssertionExpired(format!("{} is not yet valid", what)));
        }
    }
    if let Some(not_on_or_after) = node.attribute("NotOnOrAfter") {
        let not_on_or_after = parse_instant(not_on_or_after, what)?;
        if expect.now - expect.clock_skew >= not_on_or_after {
            return Err(SsoError::AssertionExpired(format!("{} has expired", what)));
        }
    }
    Ok(())
}

fn decode_post_binding(encoded: &str) -> Result<String, SsoError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|_| SsoError::InvalidResponse("message is not valid base64".into()))?;
    String::from_utf8(bytes)
        .map_err(|_| SsoError::InvalidResponse("message is not valid UTF-8".into()))
}

fn parse_document(xml: &str) -> Result<Document<'_>, SsoError> {
    // roxmltree refuses DTDs unless explicitly allowed, which rules out
    // entity expansion attacks
    Document::parse(xml).map_err(|e| SsoError::InvalidResponse(format!("malformed XML: {}", e)))
}

/// Reject documents where two elements share an `ID`; signature references
/// must resolve to exactly one element.
fn ensure_unique_ids(doc: &Document) -> Result<(), SsoError> {
    let mut seen = std::collections::HashSet::new();
    for id in doc.descendants().filter_map(|n| n.attribute("ID")) {
        if !seen.insert(id) {
            return Err(SsoError::InvalidSignature(format!("duplicate ID '{}'", id)));
        }
    }
    Ok(())
}

/// Validate a base64 `SAMLResponse` from the POST binding.
///
/// Checks, in order: structure (one plain assertion, unique IDs), IdP
/// status, signatures against the configured certificates, destination,
/// issuers, `InResponseTo`, validity windows, audience and subject
/// confirmation. Everything returned is read from the assertion element that
/// the verified signature covers.
pub fn validate_response(
    saml_response: &str,
    idp: &SamlProviderConfig,
    expect: &ResponseExpectations,
) -> Result<ValidatedAssertion, SsoError> {
    let xml = decode_post_binding(saml_response)?;
    let doc = parse_document(&xml)?;
    let response = doc.root_element();
    if !response.has_tag_name((PROTOCOL_NS, "Response")) {
        return Err(SsoError::InvalidResponse("root element is not a Response".into()));
    }

    ensure_unique_ids(&doc)?;
    if doc
        .descendants()
        .any(|n| n.has_tag_name((ASSERTION_NS, "EncryptedAssertion")))
    {
        return Err(SsoError::InvalidResponse(
            "encrypted assertions are not supported".into(),
        ));
    }
    let assertions: Vec<Node> = doc
        .descendants()
        .filter(|n| n.has_tag_name((ASSERTION_NS, "Assertion")))
        .collect();
    let [assertion] = assertions.as_slice() else {
        return Err(SsoError::InvalidResponse(format!(
            "expected exactly one assertion, found {}",
            assertions.len()
        )));
    };
    let assertion = *assertion;
    if assertion.parent_element().map(|p| p.id()) != Some(response.id()) {
        return Err(SsoError::InvalidResponse(
            "assertion is not a direct child of the response".into(),
        ));
    }

    // Status
    let status_code = child(response, PROTOCOL_NS, "Status")
        .and_then(|s| child(s, PROTOCOL_NS, "StatusCode"))
        .and_then(|c| c.attribute("Value"))
        .ok_or_else(|| SsoError::InvalidResponse("missing status code".into()))?;
    if status_code != STATUS_SUCCESS {
        let message = child(response, PROTOCOL_NS, "Status")
            .and_then(|s| child(s, PROTOCOL_NS, "StatusMessage"))
            .map(element_text)
            .unwrap_or_default();
        return Err(SsoError::IdpRejected(format!("{} {}", status_code, message).trim().to_string()));
    }

    // Signatures
    let keys = TrustedKeys::from_pem(&idp.certificate)?;
    let response_signed = xmldsig::enveloped_signature(response).is_some();
    let assertion_signed = xmldsig::enveloped_signature(assertion).is_some();
    if idp.want_response_signed && !response_signed {
        return Err(SsoError::InvalidSignature("response is not signed".into()));
    }
    if idp.want_assertions_signed && !assertion_signed {
        return Err(SsoError::InvalidSignature("assertion is not signed".into()));
    }
    if !response_signed && !assertion_signed {
        return Err(SsoError::InvalidSignature(
            "no signature covers the assertion".into(),
        ));
    }
    if response_signed {
        xmldsig::verify_enveloped(&doc, response, &keys, expect.allow_sha1)?;
    }
    if assertion_signed {
        xmldsig::verify_enveloped(&doc, assertion, &keys, expect.allow_sha1)?;
    }

    if let Some(destination) = response.attribute("Destination")
        && destination != expect.acs_url
    {
        return Err(SsoError::InvalidResponse(format!(
            "destination '{}' is not this service",
            destination
        )));
    }

    // Issuers
    if let Some(issuer) = child(response, ASSERTION_NS, "Issuer").map(element_text)
        && issuer != idp.entity_id
    {
        return Err(SsoError::IssuerMismatch {
            expected: idp.entity_id.clone(),
            actual: issuer,
        });
    }
    let issuer = child(assertion, ASSERTION_NS, "Issuer")
        .map(element_text)
        .ok_or_else(|| SsoError::InvalidResponse("assertion has no issuer".into()))?;
    if issuer != idp.entity_id {
        return Err(SsoError::IssuerMismatch {
            expected: idp.entity_id.clone(),
            actual: issuer,
        });
    }

    // Request binding
    let mut in_response_to_seen = false;
    if let Some(irt) = response.attribute("InResponseTo") {
        if irt != expect.request_id {
            return Err(SsoError::InvalidResponse(
                "response does not answer this login request".into(),
            ));
        }
        in_response_to_seen = true;
    }

    // Conditions
    let conditions = child(assertion, ASSERTION_NS, "Conditions")
        .ok_or_else(|| SsoError::InvalidResponse("assertion has no conditions".into()))?;
    check_window(conditions, expect, "assertion")?;
    let restrictions: Vec<Node> =
        children(conditions, ASSERTION_NS, "AudienceRestriction").collect();
    if restrictions.is_empty() {
        return Err(SsoError::AudienceMismatch("no audience restriction".into()));
    }
    for restriction in restrictions {
        let allowed = children(restriction, ASSERTION_NS, "Audience")
            .map(element_text)
            .any(|audience| audience == expect.sp_entity_id);
        if !allowed {
            return Err(SsoError::AudienceMismatch(format!(
                "'{}' is not an allowed audience",
                expect.sp_entity_id
            )));
        }
    }

    // Subject
    let subject = child(assertion, ASSERTION_NS, "Subject")
        .ok_or_else(|| SsoError::InvalidResponse("assertion has no subject".into()))?;
    let name_id = child(subject, ASSERTION_NS, "NameID")
        .map(element_text)
        .unwrap_or_default();

    let mut bearer_confirmed = false;
    for confirmation in children(subject, ASSERTION_NS, "SubjectConfirmation") {
        if confirmation.attribute("Method") != Some(BEARER) {
            continue;
        }
        if let Some(data) = child(confirmation, ASSERTION_NS, "SubjectConfirmationData") {
            check_window(data, expect, "subject confirmation")?;
            if let Some(recipient) = data.attribute("Recipient")
                && recipient != expect.acs_url
            {
                return Err(SsoError::InvalidResponse(format!(
                    "recipient '{}' is not this service",
                    recipient
                )));
            }
            if let Some(irt) = data.attribute("InResponseTo") {
                if irt != expect.request_id {
                    return Err(SsoError::InvalidResponse(
                        "subject confirmation does not answer this login request".into(),
                    ));
                }
                in_response_to_seen = true;
            }
        }
        bearer_confirmed = true;
    }
    if !bearer_confirmed {
        return Err(SsoError::InvalidResponse(
            "assertion has no bearer subject confirmation".into(),
        ));
    }
    if !in_response_to_seen {
        return Err(SsoError::InvalidResponse(
            "unsolicited responses are not accepted".into(),
        ));
    }

    let session_index = child(assertion, ASSERTION_NS, "AuthnStatement")
        .and_then(|s| s.attribute("SessionIndex"))
        .map(str::to_string);

    let mut claims = ClaimBag::new();
    for statement in children(assertion, ASSERTION_NS, "AttributeStatement") {
        for attribute in children(statement, ASSERTION_NS, "Attribute") {
            let Some(name) = attribute.attribute("Name") else {
                continue;
            };
            let friendly = attribute.attribute("FriendlyName");
            for value in children(attribute, ASSERTION_NS, "AttributeValue") {
                let value = element_text(value);
                claims.insert(name, value.clone());
                if let Some(friendly) = friendly {
                    claims.insert(friendly, value);
                }
            }
        }
    }

    tracing::debug!(
        issuer = %issuer,
        attributes = claims.len(),
        has_session_index = session_index.is_some(),
        "SAML assertion validated"
    );

    Ok(ValidatedAssertion {
        issuer,
        name_id,
        session_index,
        claims,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// IdP-initiated Logout
// ─────────────────────────────────────────────────────────────────────────────

/// Binding an incoming `SAMLRequest` arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Query string, DEFLATE-compressed.
    Redirect,
    /// Form post, base64 only.
    Post,
}

#[derive(Debug, Clone)]
pub struct IdpLogoutRequest {
    pub id: String,
    pub issuer: String,
    pub name_id: Option<String>,
    pub session_indexes: Vec<String>,
}

/// Decode an IdP LogoutRequest. When `keys` is given and the POST binding
/// carries an enveloped signature, the signature is verified.
pub fn parse_logout_request(
    encoded: &str,
    binding: Binding,
    keys: Option<&TrustedKeys>,
    allow_sha1: bool,
) -> Result<IdpLogoutRequest, SsoError> {
    let xml = match binding {
        Binding::Post => decode_post_binding(encoded)?,
        Binding::Redirect => {
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            let compressed = STANDARD
                .decode(compact)
                .map_err(|_| SsoError::InvalidResponse("message is not valid base64".into()))?;
            let mut xml = String::new();
            DeflateDecoder::new(compressed.as_slice())
                .take(1024 * 1024)
                .read_to_string(&mut xml)
                .map_err(|_| SsoError::InvalidResponse("message is not valid DEFLATE".into()))?;
            xml
        }
    };

    let doc = parse_document(&xml)?;
    let root = doc.root_element();
    if !root.has_tag_name((PROTOCOL_NS, "LogoutRequest")) {
        return Err(SsoError::InvalidResponse("not a LogoutRequest".into()));
    }
    ensure_unique_ids(&doc)?;
    if let Some(keys) = keys
        && xmldsig::enveloped_signature(root).is_some()
    {
        xmldsig::verify_enveloped(&doc, root, keys, allow_sha1)?;
    }

    let id = root
        .attribute("ID")
        .ok_or_else(|| SsoError::InvalidResponse("LogoutRequest has no ID".into()))?
        .to_string();
    let issuer = child(root, ASSERTION_NS, "Issuer")
        .map(element_text)
        .ok_or_else(|| SsoError::InvalidResponse("LogoutRequest has no issuer".into()))?;
    let name_id = child(root, ASSERTION_NS, "NameID")
        .map(element_text)
        .filter(|n| !n.is_empty());
    let session_indexes = children(root, PROTOCOL_NS, "SessionIndex")
        .map(element_text)
        .filter(|s| !s.is_empty())
        .collect();

    Ok(IdpLogoutRequest {
        id,
        issuer,
        name_id,
        session_indexes,
    })
}

/// Verify the `SigAlg`/`Signature` parameters of an HTTP-Redirect binding
/// query. Returns `Ok(false)` when the query is unsigned.
///
/// The signed octets are the raw (still URL-encoded) `SAMLRequest`,
/// `RelayState` and `SigAlg` pairs in that order, exactly as received.
pub fn verify_redirect_signature(
    raw_query: &str,
    keys: &TrustedKeys,
    allow_sha1: bool,
) -> Result<bool, SsoError> {
    let raw_param = |name: &str| {
        raw_query
            .split('&')
            .find(|pair| pair.split('=').next() == Some(name))
    };
    let decoded = |name: &str| {
        url::form_urlencoded::parse(raw_query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let Some(signature) = decoded("Signature") else {
        return Ok(false);
    };
    let sig_alg = decoded("SigAlg")
        .ok_or_else(|| SsoError::InvalidSignature("Signature without SigAlg".into()))?;

    let signed: Vec<&str> = ["SAMLRequest", "RelayState", "SigAlg"]
        .into_iter()
        .filter_map(raw_param)
        .collect();
    let signature = STANDARD
        .decode(signature.replace(' ', "+"))
        .map_err(|_| SsoError::InvalidSignature("signature is not base64".into()))?;

    xmldsig::verify_detached(keys, &sig_alg, signed.join("&").as_bytes(), &signature, allow_sha1)?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
