//! ID token validation against a provider's JWKS.
//!
//! Keys are fetched on every validation; the provider row (and with it the
//! JWKS location) is re-read per request, so there is nothing to cache safely.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, TokenData, Validation, decode, decode_header,
    errors::ErrorKind,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm},
};

use super::{SsoError, state::states_match};

/// Signature algorithms accepted for ID tokens. Symmetric algorithms and
/// `none` are never accepted.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Validates one ID token for one provider.
pub struct IdTokenValidator<'a> {
    pub http: &'a reqwest::Client,
    pub jwks_uri: &'a str,
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub leeway_secs: u64,
}

impl IdTokenValidator<'_> {
    /// Validate signature, issuer, audience, expiry and nonce, returning the
    /// verified claims.
    pub async fn validate(&self, token: &str, expected_nonce: &str) -> Result<Claims, SsoError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Failed to decode ID token header");
            SsoError::InvalidToken("malformed token header".into())
        })?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            tracing::warn!(algorithm = ?header.alg, "ID token algorithm not in allowlist");
            return Err(SsoError::InvalidToken(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| SsoError::InvalidToken("token has no key ID".into()))?;

        let decoding_key = self.decoding_key(kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer]);
        validation.set_audience(&[self.client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.leeway_secs;

        let token_data: TokenData<Claims> =
            decode(token, &decoding_key, &validation).map_err(|e| {
                tracing::debug!(error = %e, "ID token validation failed");
                match e.kind() {
                    ErrorKind::ExpiredSignature => SsoError::InvalidToken("token has expired".into()),
                    ErrorKind::ImmatureSignature => {
                        SsoError::InvalidToken("token is not yet valid".into())
                    }
                    ErrorKind::InvalidAudience => SsoError::AudienceMismatch(format!(
                        "token audience does not include '{}'",
                        self.client_id
                    )),
                    ErrorKind::InvalidIssuer => SsoError::IssuerMismatch {
                        expected: self.issuer.to_string(),
                        actual: unverified_claim(token, "iss").unwrap_or_default(),
                    },
                    ErrorKind::InvalidSignature => {
                        SsoError::InvalidToken("signature verification failed".into())
                    }
                    _ => SsoError::InvalidToken(e.to_string()),
                }
            })?;

        let claims = token_data.claims;
        let nonce = claims
            .get("nonce")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if !states_match(nonce, expected_nonce) {
            tracing::warn!("OIDC nonce mismatch: possible token substitution or replay");
            return Err(SsoError::InvalidToken("nonce mismatch".into()));
        }

        Ok(claims)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, SsoError> {
        tracing::debug!(url = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http
            .get(self.jwks_uri)
            .send()
            .await
            .map_err(|e| SsoError::from_http("JWKS request", e))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, url = %self.jwks_uri, "JWKS endpoint returned error");
            return Err(SsoError::Upstream(format!("JWKS endpoint returned {}", status)));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| SsoError::Upstream(format!("Failed to parse JWKS: {}", e)))?;

        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or_else(|| {
                tracing::warn!(kid = kid, "Key ID not found in JWKS");
                SsoError::InvalidToken(format!("unknown key ID '{}'", kid))
            })?;

        jwk_to_decoding_key(jwk)
    }
}

/// Convert a JWK to a DecodingKey. Only RSA and EC keys are usable.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, SsoError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|e| SsoError::InvalidToken(format!("unusable RSA key: {}", e))),
        AlgorithmParameters::EllipticCurve(ec) => match jwk.common.key_algorithm {
            Some(KeyAlgorithm::ES256) | Some(KeyAlgorithm::ES384) | None => {
                DecodingKey::from_ec_components(&ec.x, &ec.y)
                    .map_err(|e| SsoError::InvalidToken(format!("unusable EC key: {}", e)))
            }
            Some(alg) => Err(SsoError::InvalidToken(format!(
                "unsupported EC algorithm: {alg:?}"
            ))),
        },
        _ => Err(SsoError::InvalidToken("unsupported JWK key type".into())),
    }
}

/// Read a claim without verifying anything, for error messages only.
fn unverified_claim(token: &str, name: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.get(name)?.as_str().map(str::to_string)
}


#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::{test_support::*, *};

    const ISSUER: &str = "https://login.acme-corp.com";
    const CLIENT_ID: &str = "lms-client";

    async fn jwks_server(keys: &TestKeys) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&keys.jwks))
            .mount(&server)
            .await;
        server
    }

    async fn run(token: &str, server: &MockServer, nonce: &str) -> Result<Claims, SsoError> {
        let http = reqwest::Client::new();
        let jwks_uri = format!("{}/jwks", server.uri());
        IdTokenValidator {
            http: &http,
            jwks_uri: &jwks_uri,
            issuer: ISSUER,
            client_id: CLIENT_ID,
            leeway_secs: 60,
        }
        .validate(token, nonce)
        .await
    }

    #[tokio::test]
    async fn test_valid_token() {
        let keys = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let token = keys.sign(&id_token_claims(ISSUER, CLIENT_ID, "n-1"));

        let claims = run(&token, &server, "n-1").await.unwrap();
        assert_eq!(claims.get("sub").and_then(|v| v.as_str()), Some("user-123"));
    }

    #[tokio::test]
    async fn test_nonce_mismatch() {
        let keys = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let token = keys.sign(&id_token_claims(ISSUER, CLIENT_ID, "n-1"));

        let err = run(&token, &server, "n-2").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidToken(ref m) if m == "nonce mismatch"));
    }

    #[tokio::test]
    async fn test_wrong_audience() {
        let keys = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let token = keys.sign(&id_token_claims(ISSUER, "someone-else", "n-1"));

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::AudienceMismatch(_)));
    }

    #[tokio::test]
    async fn test_wrong_issuer() {
        let keys = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let token = keys.sign(&id_token_claims("https://evil.example.com", CLIENT_ID, "n-1"));

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(
            err,
            SsoError::IssuerMismatch { ref actual, .. } if actual == "https://evil.example.com"
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let keys = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let mut claims = id_token_claims(ISSUER, CLIENT_ID, "n-1");
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        let token = keys.sign(&claims);

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidToken(ref m) if m.contains("expired")));
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let keys = TestKeys::generate("k1");
        let other = TestKeys::generate("k2");
        let server = jwks_server(&keys).await;
        let token = other.sign(&id_token_claims(ISSUER, CLIENT_ID, "n-1"));

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidToken(ref m) if m.contains("unknown key")));
    }

    #[tokio::test]
    async fn test_signature_from_other_key() {
        let keys = TestKeys::generate("k1");
        let forger = TestKeys::generate("k1");
        let server = jwks_server(&keys).await;
        let token = forger.sign(&id_token_claims(ISSUER, CLIENT_ID, "n-1"));

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_hs256_rejected() {
        let server = MockServer::start().await;
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".into());
        let token = encode(
            &header,
            &id_token_claims(ISSUER, CLIENT_ID, "n-1"),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidToken(ref m) if m.contains("not allowed")));
    }

    #[tokio::test]
    async fn test_jwks_outage_is_upstream_error() {
        let keys = TestKeys::generate("k1");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let token = keys.sign(&id_token_claims(ISSUER, CLIENT_ID, "n-1"));

        let err = run(&token, &server, "n-1").await.unwrap_err();
        assert!(matches!(err, SsoError::Upstream(_)));
    }
}
