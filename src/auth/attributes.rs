//! Attribute extraction: IdP claims to [`NormalizedAttributes`].
//!
//! SAML attribute statements and OIDC ID token claims are both collected into
//! a [`ClaimBag`] first. The bag stays inside the auth layer; only the
//! normalized record is handed to provisioning.

use std::collections::HashMap;

use super::SsoError;
use crate::models::{AttributeMapping, NormalizedAttributes};

const EMAIL_CLAIMS: &[&str] = &[
    "email",
    "mail",
    "emailaddress",
    "emails",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
    "urn:oid:0.9.2342.19200300.100.1.3",
];

const FIRST_NAME_CLAIMS: &[&str] = &[
    "givenName",
    "firstName",
    "given_name",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname",
    "urn:oid:2.5.4.42",
];

const LAST_NAME_CLAIMS: &[&str] = &[
    "surname",
    "lastName",
    "family_name",
    "sn",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname",
    "urn:oid:2.5.4.4",
];

const DISPLAY_NAME_CLAIMS: &[&str] = &[
    "name",
    "displayName",
    "http://schemas.microsoft.com/identity/claims/displayname",
    "urn:oid:2.16.840.1.113730.3.1.241",
];

/// Multi-valued claims keyed by attribute or claim name.
#[derive(Debug, Clone, Default)]
pub struct ClaimBag {
    values: HashMap<String, Vec<String>>,
}

impl ClaimBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_default().push(value.into());
    }

    /// Collect string-like claims from a decoded JWT payload. Arrays keep
    /// every string element; nested objects are ignored.
    pub fn from_json(claims: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut bag = Self::new();
        for (name, value) in claims {
            match value {
                serde_json::Value::String(s) => bag.insert(name.as_str(), s.as_str()),
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(s) = item.as_str() {
                            bag.insert(name.as_str(), s);
                        }
                    }
                }
                serde_json::Value::Number(n) => bag.insert(name.as_str(), n.to_string()),
                serde_json::Value::Bool(b) => bag.insert(name.as_str(), b.to_string()),
                _ => {}
            }
        }
        bag
    }

    /// First non-empty value of a claim. Exact name match wins over a
    /// case-insensitive one.
    pub fn first(&self, name: &str) -> Option<&str> {
        let values = self.values.get(name).or_else(|| {
            self.values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })?;
        values
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn resolve(&self, mapped: Option<&str>, fallbacks: &[&str]) -> Option<String> {
        mapped
            .into_iter()
            .chain(fallbacks.iter().copied())
            .find_map(|name| self.first(name))
            .map(str::to_string)
    }
}

/// Identity facts that come from the protocol envelope rather than claims.
#[derive(Debug, Clone, Default)]
pub struct SubjectInfo {
    /// SAML NameID, OIDC `sub`, or Azure `oid`.
    pub external_id: String,
    /// SAML NameID, usable as an email fallback when it looks like one.
    pub name_id: Option<String>,
    pub session_index: Option<String>,
}

/// Exactly one `@` with both sides non-empty, so the domain the allow-list
/// checks is the only domain in the address.
fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(email)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Resolve every profile field: mapped claim first, then protocol defaults.
pub fn normalize(
    claims: &ClaimBag,
    mapping: &AttributeMapping,
    subject: SubjectInfo,
) -> Result<NormalizedAttributes, SsoError> {
    let external_id = subject.external_id.trim().to_string();
    if external_id.is_empty() {
        return Err(SsoError::MissingAttribute("external id".into()));
    }

    let email = claims
        .resolve(mapping.email.as_deref(), EMAIL_CLAIMS)
        .as_deref()
        .and_then(normalize_email)
        .or_else(|| subject.name_id.as_deref().and_then(normalize_email))
        .ok_or_else(|| SsoError::MissingAttribute("email".into()))?;

    let first_name = non_empty(claims.resolve(mapping.first_name.as_deref(), FIRST_NAME_CLAIMS));
    let last_name = non_empty(claims.resolve(mapping.last_name.as_deref(), LAST_NAME_CLAIMS));
    let display_name = non_empty(
        claims.resolve(mapping.display_name.as_deref(), DISPLAY_NAME_CLAIMS),
    )
    .or_else(|| {
        let joined = format!(
            "{} {}",
            first_name.as_deref().unwrap_or(""),
            last_name.as_deref().unwrap_or("")
        );
        non_empty(Some(joined))
    });

    Ok(NormalizedAttributes {
        external_id,
        email,
        first_name,
        last_name,
        display_name,
        session_index: non_empty(subject.session_index),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn subject(id: &str) -> SubjectInfo {
        SubjectInfo {
            external_id: id.to_string(),
            name_id: None,
            session_index: None,
        }
    }

    #[test]
    fn test_mapped_claim_wins_over_defaults() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "default@acme.com");
        bag.insert("upn", "Mapped@Acme.com");
        let mapping = AttributeMapping {
            email: Some("upn".into()),
            ..Default::default()
        };

        let attrs = normalize(&bag, &mapping, subject("u1")).unwrap();
        assert_eq!(attrs.email, "mapped@acme.com");
    }

    #[rstest]
    #[case("email")]
    #[case("mail")]
    #[case("emailaddress")]
    #[case("http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress")]
    fn test_email_fallbacks(#[case] claim: &str) {
        let mut bag = ClaimBag::new();
        bag.insert(claim, "Jane@Acme.com");
        let attrs = normalize(&bag, &AttributeMapping::default(), subject("u1")).unwrap();
        assert_eq!(attrs.email, "jane@acme.com");
    }

    #[rstest]
    #[case("givenName", "surname")]
    #[case("firstName", "lastName")]
    #[case("given_name", "family_name")]
    fn test_name_fallbacks(#[case] first: &str, #[case] last: &str) {
        let mut bag = ClaimBag::new();
        bag.insert("email", "jane@acme.com");
        bag.insert(first, "Jane");
        bag.insert(last, "Doe");
        let attrs = normalize(&bag, &AttributeMapping::default(), subject("u1")).unwrap();
        assert_eq!(attrs.first_name.as_deref(), Some("Jane"));
        assert_eq!(attrs.last_name.as_deref(), Some("Doe"));
        assert_eq!(attrs.display_name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_display_name_claim_preferred() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "jane@acme.com");
        bag.insert("givenName", "Jane");
        bag.insert("displayName", "Dr. Jane Doe");
        let attrs = normalize(&bag, &AttributeMapping::default(), subject("u1")).unwrap();
        assert_eq!(attrs.display_name.as_deref(), Some("Dr. Jane Doe"));
    }

    #[test]
    fn test_display_name_from_first_only() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "jane@acme.com");
        bag.insert("givenName", "Jane");
        let attrs = normalize(&bag, &AttributeMapping::default(), subject("u1")).unwrap();
        assert_eq!(attrs.display_name.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_name_id_email_fallback() {
        let bag = ClaimBag::new();
        let attrs = normalize(
            &bag,
            &AttributeMapping::default(),
            SubjectInfo {
                external_id: "Jane@Acme.com".into(),
                name_id: Some("Jane@Acme.com".into()),
                session_index: Some("_idx".into()),
            },
        )
        .unwrap();
        assert_eq!(attrs.email, "jane@acme.com");
        assert_eq!(attrs.session_index.as_deref(), Some("_idx"));
    }

    #[test]
    fn test_missing_email_fails() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "not-an-email");
        let err = normalize(
            &bag,
            &AttributeMapping::default(),
            SubjectInfo {
                external_id: "opaque-id".into(),
                name_id: Some("opaque-id".into()),
                session_index: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SsoError::MissingAttribute(ref a) if a == "email"));
    }

    #[rstest]
    #[case("mallory@evil.com@acme.com")]
    #[case("@acme.com")]
    #[case("jane@")]
    #[case("jane@@acme.com")]
    fn test_malformed_email_rejected(#[case] email: &str) {
        let mut bag = ClaimBag::new();
        bag.insert("email", email);
        let err = normalize(
            &bag,
            &AttributeMapping::default(),
            SubjectInfo {
                external_id: "u1".into(),
                name_id: Some(email.into()),
                session_index: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SsoError::MissingAttribute(ref a) if a == "email"));
    }

    #[test]
    fn test_malformed_mapped_email_falls_back_to_name_id() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "mallory@evil.com@acme.com");
        let attrs = normalize(
            &bag,
            &AttributeMapping::default(),
            SubjectInfo {
                external_id: "u1".into(),
                name_id: Some("mallory@evil.com".into()),
                session_index: None,
            },
        )
        .unwrap();
        assert_eq!(attrs.email, "mallory@evil.com");
    }

    #[test]
    fn test_missing_external_id_fails() {
        let mut bag = ClaimBag::new();
        bag.insert("email", "jane@acme.com");
        let err = normalize(&bag, &AttributeMapping::default(), subject("  ")).unwrap_err();
        assert!(matches!(err, SsoError::MissingAttribute(_)));
    }

    #[test]
    fn test_from_json_collects_arrays() {
        let claims = json!({
            "sub": "abc",
            "emails": ["First@B2C.com", "second@b2c.com"],
            "email_verified": true,
            "address": {"country": "NZ"}
        });
        let bag = ClaimBag::from_json(claims.as_object().unwrap());
        assert_eq!(bag.first("emails"), Some("First@B2C.com"));
        assert_eq!(bag.first("email_verified"), Some("true"));
        assert!(bag.first("address").is_none());

        let attrs = normalize(&bag, &AttributeMapping::default(), subject("abc")).unwrap();
        assert_eq!(attrs.email, "first@b2c.com");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut bag = ClaimBag::new();
        bag.insert("EMAIL", "jane@acme.com");
        assert_eq!(bag.first("email"), Some("jane@acme.com"));
    }
}
