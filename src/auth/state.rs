//! Login state and CSRF protection.
//!
//! A login round trip carries one random state value: it goes to the IdP
//! (`RelayState` for SAML, `state` for OAuth) and into an HMAC-signed cookie.
//! The callback is only processed when both copies match. The OIDC nonce and
//! the PKCE verifier are derived from the state with the same key, so the
//! cookie is the only thing that has to survive between login and callback.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_cookies::{Cookie, cookie::SameSite};

use super::SsoError;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes in every state value.
const STATE_BYTES: usize = 32;

/// Generate `len` random bytes, hex encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate `len` random bytes, base64url encoded without padding.
fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Opaque bearer token for enterprise session cookies.
pub fn generate_session_token() -> String {
    random_url_safe(32)
}

// ─────────────────────────────────────────────────────────────────────────────
// State values
// ─────────────────────────────────────────────────────────────────────────────

/// SAML relay state, sent to the IdP as JSON and echoed back on the callback.
///
/// IdPs may cap RelayState at 80 bytes, so only what the callback cannot look
/// up goes in here. The AuthnRequest ID stays server-side, keyed by `nonce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub organization_slug: String,
    /// Unix milliseconds at creation.
    pub timestamp: i64,
    /// Base64url, no padding.
    pub nonce: String,
}

impl RelayState {
    pub fn new(organization_slug: &str) -> Self {
        Self {
            organization_slug: organization_slug.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            nonce: random_url_safe(STATE_BYTES),
        }
    }

    pub fn encode(&self) -> Result<String, SsoError> {
        serde_json::to_string(self)
            .map_err(|e| SsoError::Internal(format!("Failed to encode relay state: {}", e)))
    }

    pub fn parse(raw: &str) -> Result<Self, SsoError> {
        let state: RelayState = serde_json::from_str(raw)
            .map_err(|_| SsoError::StateMismatch("relay state is not valid JSON".into()))?;
        if state.organization_slug.is_empty() || state.nonce.is_empty() {
            return Err(SsoError::StateMismatch(
                "relay state has no organization".into(),
            ));
        }
        Ok(state)
    }
}

/// OAuth `state` parameter: `"{random hex}|{organization slug}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub nonce: String,
    pub organization_slug: String,
}

impl OAuthState {
    pub fn new(organization_slug: &str) -> Self {
        Self {
            nonce: random_hex(STATE_BYTES),
            organization_slug: organization_slug.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, SsoError> {
        let (nonce, slug) = raw
            .split_once('|')
            .ok_or_else(|| SsoError::StateMismatch("malformed state parameter".into()))?;
        if nonce.is_empty() || slug.is_empty() {
            return Err(SsoError::StateMismatch("malformed state parameter".into()));
        }
        Ok(Self {
            nonce: nonce.to_string(),
            organization_slug: slug.to_string(),
        })
    }
}

impl fmt::Display for OAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.nonce, self.organization_slug)
    }
}

/// Constant-time equality of the echoed state and the cookie copy.
pub fn states_match(from_idp: &str, from_cookie: &str) -> bool {
    from_idp.len() == from_cookie.len()
        && bool::from(from_idp.as_bytes().ct_eq(from_cookie.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookie signing
// ─────────────────────────────────────────────────────────────────────────────

/// HMAC-SHA256 signer for state cookies and state-derived secrets.
#[derive(Clone)]
pub struct CookieSigner {
    keyed: HmacSha256,
}

impl fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    pub fn new(key: &[u8]) -> Result<Self, SsoError> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| SsoError::Internal(format!("Invalid cookie signing key: {}", e)))?;
        Ok(Self { keyed })
    }

    /// Signer from the configured secret, or a random per-process key.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, SsoError> {
        match secret {
            Some(secret) => Self::new(secret.as_bytes()),
            None => {
                tracing::warn!(
                    "sso.cookies.secret is not set; using a random key. In-flight logins \
                     will fail after a restart and across instances."
                );
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                Self::new(&key)
            }
        }
    }

    fn mac(&self, domain: &str, value: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(domain.as_bytes());
        mac.update(b":");
        mac.update(value);
        mac
    }

    /// Encode `raw` as `"{base64url(raw)}.{hex signature}"`.
    pub fn sign(&self, raw: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(raw.as_bytes());
        let sig = self.mac("cookie", payload.as_bytes()).finalize().into_bytes();
        format!("{}.{}", payload, hex::encode(sig))
    }

    /// Return the raw value of a signed cookie. Unsigned, tampered or
    /// malformed values yield `None`.
    pub fn verify(&self, signed: &str) -> Option<String> {
        let (payload, sig_hex) = signed.rsplit_once('.')?;
        let sig = hex::decode(sig_hex).ok()?;
        self.mac("cookie", payload.as_bytes())
            .verify_slice(&sig)
            .ok()?;
        let raw = URL_SAFE_NO_PAD.decode(payload).ok()?;
        String::from_utf8(raw).ok()
    }

    /// OIDC nonce bound to a state value.
    pub fn derive_nonce(&self, state: &str) -> String {
        hex::encode(self.mac("nonce", state.as_bytes()).finalize().into_bytes())
    }

    /// PKCE code verifier bound to a state value (43 URL-safe characters).
    pub fn derive_pkce_verifier(&self, state: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac("pkce", state.as_bytes()).finalize().into_bytes())
    }
}

/// S256 PKCE challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookies
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes shared by all cookies this service sets.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    /// State cookie holding a signed value. The SAML callback arrives as a
    /// cross-site POST, which only carries `SameSite=None` cookies; browsers
    /// require `Secure` for those, so plain-http deployments fall back to Lax.
    pub fn state_cookie(
        &self,
        name: &str,
        signed_value: String,
        max_age_secs: u64,
        cross_site_post: bool,
    ) -> Cookie<'static> {
        let same_site = if cross_site_post && self.secure {
            SameSite::None
        } else {
            SameSite::Lax
        };
        Cookie::build((name.to_string(), signed_value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(same_site)
            .max_age(tower_cookies::cookie::time::Duration::seconds(
                max_age_secs as i64,
            ))
            .build()
    }

    pub fn session_cookie(&self, name: &str, token: String, max_age_secs: u64) -> Cookie<'static> {
        Cookie::build((name.to_string(), token))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(tower_cookies::cookie::time::Duration::seconds(
                max_age_secs as i64,
            ))
            .build()
    }

    /// Cookie that clears `name` when added to the jar.
    pub fn removal(&self, name: &str) -> Cookie<'static> {
        Cookie::build((name.to_string(), "")).path("/").build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CookieSigner {
        CookieSigner::new(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let s = signer();
        let raw = r#"{"organizationSlug":"acme-corp","timestamp":1,"nonce":"ab"}"#;
        let signed = s.sign(raw);
        assert_eq!(s.verify(&signed).as_deref(), Some(raw));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let s = signer();
        let signed = s.sign("abc|acme-corp");

        let (payload, sig) = signed.rsplit_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(b"abc|evil-corp");
        assert!(s.verify(&format!("{}.{}", forged_payload, sig)).is_none());
        assert!(s.verify(payload).is_none());
        assert!(s.verify("abc|acme-corp").is_none());

        let other = CookieSigner::new(b"another key of at least 32 bytes!!").unwrap();
        assert!(other.verify(&signed).is_none());
    }

    #[test]
    fn test_relay_state_json_shape() {
        let state = RelayState::new("acme-corp");
        let encoded = state.encode().unwrap();
        let json: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(json["organizationSlug"], "acme-corp");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
        assert!(json.get("requestId").is_none());

        let nonce = URL_SAFE_NO_PAD.decode(json["nonce"].as_str().unwrap()).unwrap();
        assert_eq!(nonce.len(), STATE_BYTES);
        // Slug, millisecond timestamp and nonce, nothing else
        assert_eq!(encoded.len(), 112);
    }

    #[test]
    fn test_relay_state_parse_rejects_garbage() {
        assert!(matches!(
            RelayState::parse("not json"),
            Err(SsoError::StateMismatch(_))
        ));
        assert!(RelayState::parse(r#"{"organizationSlug":"","timestamp":1,"nonce":"a"}"#).is_err());
        assert!(
            RelayState::parse(r#"{"organizationSlug":"acme-corp","timestamp":1,"nonce":""}"#)
                .is_err()
        );
    }

    #[test]
    fn test_oauth_state_format() {
        let state = OAuthState::new("acme-corp");
        let raw = state.to_string();
        let (hex_part, slug) = raw.split_once('|').unwrap();
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(slug, "acme-corp");
        assert_eq!(OAuthState::parse(&raw).unwrap(), state);
        assert!(OAuthState::parse("no-separator").is_err());
    }

    #[test]
    fn test_states_are_unique() {
        let a = OAuthState::new("org1").to_string();
        let b = OAuthState::new("org1").to_string();
        assert_ne!(a, b);
        assert_ne!(
            RelayState::new("org1").nonce,
            RelayState::new("org1").nonce
        );
    }

    #[test]
    fn test_derived_values_are_deterministic_and_distinct() {
        let s = signer();
        assert_eq!(s.derive_nonce("st"), s.derive_nonce("st"));
        assert_ne!(s.derive_nonce("st"), s.derive_nonce("other"));
        let verifier = s.derive_pkce_verifier("st");
        assert_eq!(verifier.len(), 43);
        assert_ne!(verifier, s.derive_nonce("st"));
        assert_ne!(pkce_challenge(&verifier), verifier);
    }

    #[test]
    fn test_states_match() {
        assert!(states_match("abc", "abc"));
        assert!(!states_match("abc", "abd"));
        assert!(!states_match("abc", "abcd"));
    }

    #[test]
    fn test_state_cookie_same_site() {
        let secure = CookiePolicy { secure: true };
        let c = secure.state_cookie("saml_relay_state", "v".into(), 600, true);
        assert_eq!(c.same_site(), Some(SameSite::None));
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.path(), Some("/"));

        let plain = CookiePolicy { secure: false };
        let c = plain.state_cookie("saml_relay_state", "v".into(), 600, true);
        assert_eq!(c.same_site(), Some(SameSite::Lax));
    }
}
