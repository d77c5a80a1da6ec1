//! OAuth 2.0 / OpenID Connect plumbing for Azure AD B2C and generic OIDC
//! providers: endpoint resolution, authorization URLs, code exchange and
//! logout URLs.

use std::time::Duration;

use serde::Deserialize;

use super::{SsoError, jwt::Claims};
use crate::models::{AzureB2cProviderConfig, OidcProviderConfig, ProviderConfig};

/// Scopes requested from Azure AD B2C regardless of configuration.
pub const B2C_SCOPES: &str = "openid profile email offline_access";

/// OIDC discovery document (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body returned by token endpoints.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Everything the callback needs to redeem a code and check the ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEndpoints {
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub issuer: String,
    /// Consulted only when the ID token carries no email.
    pub userinfo_endpoint: Option<String>,
}

/// An OAuth-family provider configuration, borrowed from the provider row.
#[derive(Debug, Clone, Copy)]
pub enum OAuthProvider<'a> {
    AzureB2c(&'a AzureB2cProviderConfig),
    Oidc(&'a OidcProviderConfig),
}

impl<'a> OAuthProvider<'a> {
    pub fn from_config(config: &'a ProviderConfig) -> Result<Self, SsoError> {
        match config {
            ProviderConfig::AzureAdB2c(c) => Ok(Self::AzureB2c(c)),
            ProviderConfig::Oidc(c) | ProviderConfig::Okta(c) | ProviderConfig::Auth0(c) => {
                Ok(Self::Oidc(c))
            }
            ProviderConfig::Saml(_) => Err(SsoError::ProviderMisconfigured(
                "SAML provider used for an OAuth flow".into(),
            )),
        }
    }

    pub fn client_id(&self) -> &'a str {
        match self {
            Self::AzureB2c(c) => &c.client_id,
            Self::Oidc(c) => &c.client_id,
        }
    }

    fn client_secret(&self) -> &'a str {
        match self {
            Self::AzureB2c(c) => &c.client_secret,
            Self::Oidc(c) => &c.client_secret,
        }
    }

    pub fn scopes(&self) -> &'a str {
        match self {
            Self::AzureB2c(_) => B2C_SCOPES,
            Self::Oidc(c) => &c.scopes,
        }
    }

    /// Resolve the authorization endpoint. B2C endpoints follow from the
    /// authority; OIDC endpoints come from configuration or discovery.
    pub async fn authorization_endpoint(&self, http: &reqwest::Client) -> Result<String, SsoError> {
        match self {
            Self::AzureB2c(c) => Ok(format!("{}/oauth2/v2.0/authorize", b2c_authority(c))),
            Self::Oidc(c) => match &c.authorization_endpoint {
                Some(endpoint) => Ok(endpoint.clone()),
                None => Ok(discover_oidc(http, c).await?.authorization_endpoint),
            },
        }
    }

    /// Resolve the token endpoint, JWKS location and expected issuer.
    pub async fn callback_endpoints(
        &self,
        http: &reqwest::Client,
    ) -> Result<CallbackEndpoints, SsoError> {
        match self {
            Self::AzureB2c(c) => {
                // The B2C issuer contains the tenant GUID, which only the
                // policy's discovery document knows.
                let authority = b2c_authority(c);
                let discovery = fetch_discovery(
                    http,
                    &format!("{}/v2.0/.well-known/openid-configuration", authority),
                )
                .await?;
                Ok(CallbackEndpoints {
                    token_endpoint: format!("{}/oauth2/v2.0/token", authority),
                    jwks_uri: discovery.jwks_uri,
                    issuer: discovery.issuer,
                    userinfo_endpoint: None,
                })
            }
            Self::Oidc(c) if c.has_explicit_endpoints() => Ok(CallbackEndpoints {
                token_endpoint: c.token_endpoint.clone().unwrap_or_default(),
                jwks_uri: c.jwks_uri.clone().unwrap_or_default(),
                issuer: c.issuer_url.clone(),
                userinfo_endpoint: c.userinfo_endpoint.clone(),
            }),
            Self::Oidc(c) => {
                let discovery = discover_oidc(http, c).await?;
                Ok(CallbackEndpoints {
                    token_endpoint: c
                        .token_endpoint
                        .clone()
                        .unwrap_or(discovery.token_endpoint),
                    jwks_uri: c.jwks_uri.clone().unwrap_or(discovery.jwks_uri),
                    issuer: discovery.issuer,
                    userinfo_endpoint: c
                        .userinfo_endpoint
                        .clone()
                        .or(discovery.userinfo_endpoint),
                })
            }
        }
    }

    /// Build the authorization redirect URL.
    pub fn authorization_url(
        &self,
        endpoint: &str,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        code_challenge: &str,
    ) -> Result<String, SsoError> {
        let mut url = url::Url::parse(endpoint).map_err(|e| {
            SsoError::ProviderMisconfigured(format!("Invalid authorization endpoint: {}", e))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", self.client_id())
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", self.scopes())
                .append_pair("state", state)
                .append_pair("nonce", nonce)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("response_mode", "query");
            if matches!(self, Self::AzureB2c(_)) {
                query.append_pair("prompt", "select_account");
            }
        }

        Ok(url.to_string())
    }

    /// Redeem an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        token_endpoint: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        timeout: Duration,
    ) -> Result<TokenResponse, SsoError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id()),
            ("client_secret", self.client_secret()),
            ("code_verifier", code_verifier),
            ("scope", self.scopes()),
        ];

        let response = http
            .post(token_endpoint)
            .form(&params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SsoError::from_http("token exchange", e))?;

        let status = response.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "Token endpoint returned server error");
            return Err(SsoError::Upstream(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => format!("token endpoint returned {}", status),
            };
            tracing::warn!(status = %status, reason = %reason, "Token exchange rejected");
            return Err(SsoError::InvalidResponse(format!("token exchange failed ({})", reason)));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| SsoError::InvalidResponse(format!("malformed token response: {}", e)))?;

        if tokens.id_token.is_none() {
            return Err(SsoError::InvalidResponse("token response has no id_token".into()));
        }

        Ok(tokens)
    }

    /// RP-initiated logout URL, when the provider supports one.
    pub async fn logout_url(
        &self,
        http: &reqwest::Client,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, SsoError> {
        let endpoint = match self {
            Self::AzureB2c(c) => Some(format!("{}/oauth2/v2.0/logout", b2c_authority(c))),
            Self::Oidc(c) => match &c.end_session_endpoint {
                Some(endpoint) => Some(endpoint.clone()),
                None if c.has_explicit_endpoints() => None,
                None => discover_oidc(http, c).await?.end_session_endpoint,
            },
        };

        let Some(endpoint) = endpoint else {
            return Ok(None);
        };

        let mut url = url::Url::parse(&endpoint).map_err(|e| {
            SsoError::ProviderMisconfigured(format!("Invalid logout endpoint: {}", e))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
            if matches!(self, Self::Oidc(_)) {
                query.append_pair("client_id", self.client_id());
            }
        }
        Ok(Some(url.to_string()))
    }

    /// Stable external identity from verified ID token claims.
    pub fn subject(&self, claims: &Claims) -> Option<String> {
        let claim = |name: &str| {
            claims
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match self {
            Self::AzureB2c(_) => claim("oid").or_else(|| claim("sub")),
            Self::Oidc(_) => claim("sub"),
        }
    }
}

/// `https://{tenant}.b2clogin.com/{tenant}.onmicrosoft.com/{policy}` unless an
/// authority override is configured.
pub fn b2c_authority(config: &AzureB2cProviderConfig) -> String {
    match &config.authority_url {
        Some(authority) => authority.trim_end_matches('/').to_string(),
        None => format!(
            "https://{tenant}.b2clogin.com/{tenant}.onmicrosoft.com/{policy}",
            tenant = config.tenant_id,
            policy = config.policy_name
        ),
    }
}

/// Fetch the UserInfo claims for an access token.
pub async fn fetch_userinfo(
    http: &reqwest::Client,
    endpoint: &str,
    access_token: &str,
    timeout: Duration,
) -> Result<Claims, SsoError> {
    let response = http
        .get(endpoint)
        .bearer_auth(access_token)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| SsoError::from_http("userinfo", e))?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = %status, "UserInfo request failed");
        return Err(SsoError::Upstream(format!("userinfo endpoint returned {}", status)));
    }

    response
        .json()
        .await
        .map_err(|e| SsoError::InvalidResponse(format!("malformed userinfo response: {}", e)))
}

async fn discover_oidc(
    http: &reqwest::Client,
    config: &OidcProviderConfig,
) -> Result<OidcDiscovery, SsoError> {
    let issuer = config.issuer_url.trim_end_matches('/');
    let discovery =
        fetch_discovery(http, &format!("{}/.well-known/openid-configuration", issuer)).await?;

    if discovery.issuer.trim_end_matches('/') != issuer {
        tracing::error!(
            configured = %config.issuer_url,
            discovered = %discovery.issuer,
            "OIDC discovery issuer does not match configuration"
        );
        return Err(SsoError::ProviderMisconfigured(
            "discovery document issuer does not match configured issuer".into(),
        ));
    }

    Ok(discovery)
}

async fn fetch_discovery(http: &reqwest::Client, url: &str) -> Result<OidcDiscovery, SsoError> {
    tracing::debug!(url = %url, "Fetching OIDC discovery document");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| SsoError::from_http("OIDC discovery", e))?;

    if !response.status().is_success() {
        let status = response.status();
        tracing::error!(status = %status, url = %url, "OIDC discovery endpoint returned error");
        return Err(SsoError::Upstream(format!("discovery endpoint returned {}", status)));
    }

    response
        .json()
        .await
        .map_err(|e| SsoError::Upstream(format!("Failed to parse discovery document: {}", e)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    use super::*;

    fn oidc_config(issuer: &str) -> OidcProviderConfig {
        OidcProviderConfig {
            issuer_url: issuer.to_string(),
            client_id: "lms-client".into(),
            client_secret: "s3cret".into(),
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            end_session_endpoint: None,
            scopes: "openid profile email".into(),
        }
    }

    fn b2c_config() -> AzureB2cProviderConfig {
        AzureB2cProviderConfig {
            tenant_id: "contoso".into(),
            client_id: "b2c-client".into(),
            client_secret: "s3cret".into(),
            policy_name: "B2C_1_signupsignin1".into(),
            authority_url: None,
        }
    }

    async fn discovery_server() -> MockServer {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": base,
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "jwks_uri": format!("{base}/jwks"),
                "end_session_endpoint": format!("{base}/logout"),
            })))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_b2c_authority() {
        assert_eq!(
            b2c_authority(&b2c_config()),
            "https://contoso.b2clogin.com/contoso.onmicrosoft.com/B2C_1_signupsignin1"
        );

        let custom = AzureB2cProviderConfig {
            authority_url: Some("https://login.contoso.com/tenant/policy/".into()),
            ..b2c_config()
        };
        assert_eq!(b2c_authority(&custom), "https://login.contoso.com/tenant/policy");
    }

    #[tokio::test]
    async fn test_b2c_authorization_url() {
        let config = b2c_config();
        let provider = OAuthProvider::AzureB2c(&config);
        let http = reqwest::Client::new();

        let endpoint = provider.authorization_endpoint(&http).await.unwrap();
        let url = provider
            .authorization_url(
                &endpoint,
                "https://lms.example.com/api/auth/azure/callback",
                "abc|acme-corp",
                "nonce-1",
                "challenge-1",
            )
            .unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(
            "https://contoso.b2clogin.com/contoso.onmicrosoft.com/B2C_1_signupsignin1/oauth2/v2.0/authorize?"
        ));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "b2c-client");
        assert_eq!(params["scope"], B2C_SCOPES);
        assert_eq!(params["state"], "abc|acme-corp");
        assert_eq!(params["nonce"], "nonce-1");
        assert_eq!(params["code_challenge"], "challenge-1");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["response_mode"], "query");
        assert_eq!(params["prompt"], "select_account");
    }

    #[tokio::test]
    async fn test_oidc_discovery_resolution() {
        let server = discovery_server().await;
        let config = oidc_config(&server.uri());
        let provider = OAuthProvider::Oidc(&config);
        let http = reqwest::Client::new();

        let endpoint = provider.authorization_endpoint(&http).await.unwrap();
        assert_eq!(endpoint, format!("{}/authorize", server.uri()));

        let callback = provider.callback_endpoints(&http).await.unwrap();
        assert_eq!(callback.token_endpoint, format!("{}/token", server.uri()));
        assert_eq!(callback.jwks_uri, format!("{}/jwks", server.uri()));
        assert_eq!(callback.issuer, server.uri());

        let url = provider
            .authorization_url(&endpoint, "https://lms/cb", "s", "n", "c")
            .unwrap();
        assert!(!url.contains("prompt="));
    }

    #[tokio::test]
    async fn test_discovery_issuer_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": "https://attacker.example.com",
                "authorization_endpoint": "https://attacker.example.com/authorize",
                "token_endpoint": "https://attacker.example.com/token",
                "jwks_uri": "https://attacker.example.com/jwks",
            })))
            .mount(&server)
            .await;

        let config = oidc_config(&server.uri());
        let err = OAuthProvider::Oidc(&config)
            .authorization_endpoint(&reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::ProviderMisconfigured(_)));
    }

    #[tokio::test]
    async fn test_discovery_trailing_slash_tolerated() {
        let server = discovery_server().await;
        let config = oidc_config(&format!("{}/", server.uri()));
        let endpoint = OAuthProvider::Oidc(&config)
            .authorization_endpoint(&reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(endpoint, format!("{}/authorize", server.uri()));
    }

    #[tokio::test]
    async fn test_discovery_outage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = oidc_config(&server.uri());
        let err = OAuthProvider::Oidc(&config)
            .callback_endpoints(&reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_explicit_endpoints_skip_discovery() {
        let config = OidcProviderConfig {
            authorization_endpoint: Some("https://idp.example.com/auth".into()),
            token_endpoint: Some("https://idp.example.com/token".into()),
            jwks_uri: Some("https://idp.example.com/keys".into()),
            ..oidc_config("https://idp.example.com")
        };
        let provider = OAuthProvider::Oidc(&config);
        let http = reqwest::Client::new();

        let callback = provider.callback_endpoints(&http).await.unwrap();
        assert_eq!(
            callback,
            CallbackEndpoints {
                token_endpoint: "https://idp.example.com/token".into(),
                jwks_uri: "https://idp.example.com/keys".into(),
                issuer: "https://idp.example.com".into(),
                userinfo_endpoint: None,
            }
        );
        assert_eq!(provider.logout_url(&http, "https://lms/login").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": "header.payload.sig",
            })))
            .mount(&server)
            .await;

        let config = oidc_config(&server.uri());
        let provider = OAuthProvider::Oidc(&config);
        let tokens = provider
            .exchange_code(
                &reqwest::Client::new(),
                &format!("{}/token", server.uri()),
                "code-1",
                "https://lms/cb",
                "verifier-1",
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(tokens.id_token.as_deref(), Some("header.payload.sig"));
    }

    #[tokio::test]
    async fn test_exchange_code_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rejected"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "code expired",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/no-id-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "at"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id_token": "x"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = oidc_config(&server.uri());
        let provider = OAuthProvider::Oidc(&config);
        let http = reqwest::Client::new();
        let exchange = |p: &'static str, timeout: u64| {
            let endpoint = format!("{}{}", server.uri(), p);
            let http = http.clone();
            async move {
                provider
                    .exchange_code(&http, &endpoint, "c", "r", "v", Duration::from_millis(timeout))
                    .await
            }
        };

        let err = exchange("/rejected", 5000).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidResponse(ref m) if m.contains("invalid_grant")));

        let err = exchange("/broken", 5000).await.unwrap_err();
        assert!(matches!(err, SsoError::Upstream(_)));

        let err = exchange("/no-id-token", 5000).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidResponse(_)));

        let err = exchange("/slow", 100).await.unwrap_err();
        assert!(matches!(err, SsoError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_logout_urls() {
        let http = reqwest::Client::new();

        let b2c = b2c_config();
        let url = OAuthProvider::AzureB2c(&b2c)
            .logout_url(&http, "https://lms.example.com/login?logged_out=true")
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with(
            "https://contoso.b2clogin.com/contoso.onmicrosoft.com/B2C_1_signupsignin1/oauth2/v2.0/logout?post_logout_redirect_uri="
        ));

        let server = discovery_server().await;
        let config = oidc_config(&server.uri());
        let url = OAuthProvider::Oidc(&config)
            .logout_url(&http, "https://lms/login")
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with(&format!("{}/logout?", server.uri())));
        assert!(url.contains("client_id=lms-client"));
    }

    #[test]
    fn test_subject_extraction() {
        let claims: Claims = serde_json::from_value(json!({"sub": "s-1", "oid": "o-1"})).unwrap();
        let b2c = b2c_config();
        let oidc = oidc_config("https://idp");

        assert_eq!(OAuthProvider::AzureB2c(&b2c).subject(&claims).as_deref(), Some("o-1"));
        assert_eq!(OAuthProvider::Oidc(&oidc).subject(&claims).as_deref(), Some("s-1"));

        let sub_only: Claims = serde_json::from_value(json!({"sub": "s-1"})).unwrap();
        assert_eq!(OAuthProvider::AzureB2c(&b2c).subject(&sub_only).as_deref(), Some("s-1"));
    }

    #[test]
    fn test_saml_config_rejected() {
        let config = ProviderConfig::Saml(crate::models::SamlProviderConfig {
            entity_id: "e".into(),
            sso_url: "https://idp/sso".into(),
            slo_url: None,
            certificate: String::new(),
            name_id_format: String::new(),
            want_assertions_signed: true,
            want_response_signed: true,
        });
        assert!(matches!(
            OAuthProvider::from_config(&config),
            Err(SsoError::ProviderMisconfigured(_))
        ));
    }
}
