//! Login initiation and callback completion for every protocol.
//!
//! Each callback runs its fallible flow to completion and then writes exactly
//! one login attempt row, whatever the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{
    AttemptContext, LoginAttemptService, ProvisioningService, RequestContext, Resolution,
    SessionService, SsoEnvironment, SsoProviderService,
};
use crate::{
    auth::{
        ClaimBag, OAuthState, RelayState, SsoError, SubjectInfo, jwt::IdTokenValidator, normalize,
        oidc::{OAuthProvider, fetch_userinfo},
        saml::{self, IdentityProvider, ResponseExpectations},
        state::{pkce_challenge, states_match},
    },
    db::DbPool,
    models::{NormalizedAttributes, Organization, ProviderConfig, SsoProtocol, SsoProvider},
};

/// Everything a route needs to send the browser to the IdP.
#[derive(Debug, Clone)]
pub struct LoginInitiation {
    pub authorization_url: String,
    /// Signed value for the state cookie.
    pub state_cookie_value: String,
    pub cookie_name: &'static str,
}

/// Form posted to the SAML assertion consumer service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SamlCallbackForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Query parameters of an OAuth redirect back from the IdP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub resolution: Resolution,
}

#[derive(Clone)]
pub struct LoginFlowService {
    db: Arc<DbPool>,
    env: SsoEnvironment,
    registry: SsoProviderService,
    provisioning: ProvisioningService,
    sessions: SessionService,
    audit: LoginAttemptService,
}

impl LoginFlowService {
    pub fn new(
        db: Arc<DbPool>,
        env: SsoEnvironment,
        registry: SsoProviderService,
        provisioning: ProvisioningService,
        sessions: SessionService,
        audit: LoginAttemptService,
    ) -> Self {
        Self {
            db,
            env,
            registry,
            provisioning,
            sessions,
            audit,
        }
    }

    /// Build the IdP redirect and the state to remember in a cookie.
    pub async fn initiate(
        &self,
        organization_slug: &str,
        protocol: SsoProtocol,
    ) -> Result<LoginInitiation, SsoError> {
        let slug = organization_slug.trim();
        if slug.is_empty() {
            return Err(SsoError::InvalidRequest("organizationSlug is required".into()));
        }

        let (_org, provider) = self.registry.get_provider_for_organization(slug, protocol).await?;

        let (authorization_url, raw_state) = match protocol {
            SsoProtocol::Saml => {
                let ProviderConfig::Saml(idp) = &provider.config else {
                    return Err(SsoError::ProviderMisconfigured(
                        "provider is not a SAML provider".into(),
                    ));
                };
                let redirect = IdentityProvider::new(idp).authn_request(&self.env.sp, slug)?;
                self.db
                    .authn_requests()
                    .record(
                        &redirect.request_id,
                        provider.id,
                        &redirect.relay_state.nonce,
                        Utc::now() + self.env.config.request_id_ttl(),
                    )
                    .await?;
                (redirect.url, redirect.relay_state.encode()?)
            }
            SsoProtocol::Azure | SsoProtocol::Oidc => {
                let oauth = OAuthProvider::from_config(&provider.config)?;
                let state = OAuthState::new(slug).to_string();
                let verifier = self.env.signer.derive_pkce_verifier(&state);
                let endpoint = oauth.authorization_endpoint(&self.env.http).await?;
                let url = oauth.authorization_url(
                    &endpoint,
                    &self.env.config.callback_url(protocol.as_str()),
                    &state,
                    &self.env.signer.derive_nonce(&state),
                    &pkce_challenge(&verifier),
                )?;
                (url, state)
            }
        };

        tracing::info!(
            org = %slug,
            provider_id = %provider.id,
            protocol = protocol.as_str(),
            "SSO login initiated"
        );

        Ok(LoginInitiation {
            authorization_url,
            state_cookie_value: self.env.signer.sign(&raw_state),
            cookie_name: protocol.state_cookie_name(),
        })
    }

    /// Complete a SAML login from the ACS form post.
    pub async fn complete_saml(
        &self,
        form: &SamlCallbackForm,
        state_cookie: Option<&str>,
        request: &RequestContext,
    ) -> Result<SignIn, SsoError> {
        let mut attempt = AttemptContext::default();
        let outcome = self
            .saml_callback(form, state_cookie, request, &mut attempt)
            .await;
        self.audit.record(attempt.into_attempt(&outcome, request)).await;
        outcome
    }

    /// Complete an Azure AD B2C or OIDC login from the redirect back.
    pub async fn complete_oauth(
        &self,
        protocol: SsoProtocol,
        params: &OAuthCallbackParams,
        state_cookie: Option<&str>,
        request: &RequestContext,
    ) -> Result<SignIn, SsoError> {
        let mut attempt = AttemptContext::default();
        let outcome = self
            .oauth_callback(protocol, params, state_cookie, request, &mut attempt)
            .await;
        self.audit.record(attempt.into_attempt(&outcome, request)).await;
        outcome
    }

    async fn saml_callback(
        &self,
        form: &SamlCallbackForm,
        state_cookie: Option<&str>,
        request: &RequestContext,
        attempt: &mut AttemptContext,
    ) -> Result<SignIn, SsoError> {
        let echoed = form.relay_state.as_deref().unwrap_or_default();
        let expected = match self.verified_state(state_cookie, echoed) {
            Ok(expected) => expected,
            Err(e) => {
                let claimed = RelayState::parse(echoed).ok().map(|r| r.organization_slug);
                self.attribute_org(claimed.as_deref(), attempt).await;
                return Err(e);
            }
        };
        let relay = RelayState::parse(&expected)?;

        let (_org, provider) = self
            .resolve_provider(&relay.organization_slug, SsoProtocol::Saml, attempt)
            .await?;
        let ProviderConfig::Saml(idp) = &provider.config else {
            return Err(SsoError::ProviderMisconfigured(
                "provider is not a SAML provider".into(),
            ));
        };

        let saml_response = form
            .saml_response
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SsoError::InvalidResponse("missing SAMLResponse".into()))?;

        let now = Utc::now();
        let request_id = self
            .db
            .authn_requests()
            .pending(&relay.nonce, provider.id, now)
            .await?
            .ok_or_else(|| {
                SsoError::ReplayDetected(
                    "no unanswered AuthnRequest for this relay state".into(),
                )
            })?;

        let assertion = saml::validate_response(
            saml_response,
            idp,
            &ResponseExpectations {
                sp_entity_id: &self.env.sp.entity_id,
                acs_url: &self.env.sp.acs_url,
                request_id: &request_id,
                now,
                clock_skew: self.env.config.clock_skew(),
                allow_sha1: self.env.config.allow_sha1_signatures,
            },
        )?;
        attempt.provider_user_id = Some(assertion.name_id.clone());

        if !self
            .db
            .authn_requests()
            .consume(&request_id, provider.id, now)
            .await?
        {
            return Err(SsoError::ReplayDetected(format!(
                "AuthnRequest {} is unknown, expired or already answered",
                request_id
            )));
        }

        let attributes = normalize(&assertion.claims, &provider.attribute_mapping, assertion.subject())?;
        self.sign_in(&provider, attributes, request, attempt).await
    }

    async fn oauth_callback(
        &self,
        protocol: SsoProtocol,
        params: &OAuthCallbackParams,
        state_cookie: Option<&str>,
        request: &RequestContext,
        attempt: &mut AttemptContext,
    ) -> Result<SignIn, SsoError> {
        let echoed = params.state.as_deref().unwrap_or_default();
        let expected = match self.verified_state(state_cookie, echoed) {
            Ok(expected) => expected,
            Err(e) => {
                let claimed = OAuthState::parse(echoed).ok().map(|s| s.organization_slug);
                self.attribute_org(claimed.as_deref(), attempt).await;
                return Err(e);
            }
        };
        let state = OAuthState::parse(&expected)?;

        let (_org, provider) = self
            .resolve_provider(&state.organization_slug, protocol, attempt)
            .await?;

        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(SsoError::IdpRejected(match &params.error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error.to_string(),
            }));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SsoError::InvalidResponse("missing authorization code".into()))?;

        let oauth = OAuthProvider::from_config(&provider.config)?;
        let endpoints = oauth.callback_endpoints(&self.env.http).await?;
        let tokens = oauth
            .exchange_code(
                &self.env.http,
                &endpoints.token_endpoint,
                code,
                &self.env.config.callback_url(protocol.as_str()),
                &self.env.signer.derive_pkce_verifier(&expected),
                self.env.config.http_timeout(),
            )
            .await?;
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| SsoError::InvalidResponse("token response has no id_token".into()))?;

        let mut claims = IdTokenValidator {
            http: &self.env.http,
            jwks_uri: &endpoints.jwks_uri,
            issuer: &endpoints.issuer,
            client_id: oauth.client_id(),
            leeway_secs: self.env.config.clock_skew_secs,
        }
        .validate(id_token, &self.env.signer.derive_nonce(&expected))
        .await?;

        let external_id = oauth
            .subject(&claims)
            .ok_or_else(|| SsoError::MissingAttribute("subject".into()))?;
        attempt.provider_user_id = Some(external_id.clone());

        if !claims.contains_key("email")
            && let (Some(endpoint), Some(access_token)) = (
                endpoints.userinfo_endpoint.as_deref(),
                tokens.access_token.as_deref(),
            )
        {
            let userinfo = fetch_userinfo(
                &self.env.http,
                endpoint,
                access_token,
                self.env.config.http_timeout(),
            )
            .await?;
            if userinfo.get("sub") != claims.get("sub") {
                return Err(SsoError::InvalidToken(
                    "userinfo subject does not match the ID token".into(),
                ));
            }
            // ID token claims take precedence
            for (name, value) in userinfo {
                claims.entry(name).or_insert(value);
            }
        }

        if provider.require_email_verification
            && claims.get("email_verified").and_then(|v| v.as_bool()) == Some(false)
        {
            return Err(SsoError::MissingAttribute("verified email".into()));
        }

        let attributes = normalize(
            &ClaimBag::from_json(&claims),
            &provider.attribute_mapping,
            SubjectInfo {
                external_id,
                name_id: None,
                session_index: None,
            },
        )?;
        self.sign_in(&provider, attributes, request, attempt).await
    }

    /// The raw cookie state, provided it is authentic and equals the value
    /// the IdP echoed back.
    fn verified_state(&self, state_cookie: Option<&str>, echoed: &str) -> Result<String, SsoError> {
        let expected = state_cookie
            .and_then(|c| self.env.signer.verify(c))
            .ok_or_else(|| SsoError::StateMismatch("state cookie is missing or invalid".into()))?;
        if echoed.is_empty() || !states_match(echoed, &expected) {
            return Err(SsoError::StateMismatch(
                "state returned by the identity provider does not match".into(),
            ));
        }
        Ok(expected)
    }

    async fn resolve_provider(
        &self,
        slug: &str,
        protocol: SsoProtocol,
        attempt: &mut AttemptContext,
    ) -> Result<(Organization, SsoProvider), SsoError> {
        match self.registry.get_provider_for_organization(slug, protocol).await {
            Ok((org, provider)) => {
                attempt.organization_id = Some(org.id);
                attempt.sso_provider_id = Some(provider.id);
                Ok((org, provider))
            }
            Err(e) => {
                self.attribute_org(Some(slug), attempt).await;
                Err(e)
            }
        }
    }

    /// Best-effort organization attribution for failures before the provider
    /// resolved. The slug may come from untrusted input.
    async fn attribute_org(&self, slug: Option<&str>, attempt: &mut AttemptContext) {
        let Some(slug) = slug.filter(|s| !s.is_empty()) else {
            return;
        };
        match self.db.organizations().get_by_slug(slug).await {
            Ok(org) => attempt.organization_id = org.map(|o| o.id),
            Err(e) => tracing::warn!(error = %e, "Failed to resolve organization for audit"),
        }
    }

    async fn sign_in(
        &self,
        provider: &SsoProvider,
        attributes: NormalizedAttributes,
        request: &RequestContext,
        attempt: &mut AttemptContext,
    ) -> Result<SignIn, SsoError> {
        attempt.provider_user_id = Some(attributes.external_id.clone());
        attempt.email = Some(attributes.email.clone());
        tracing::debug!(
            provider_id = %provider.id,
            email = %attributes.email,
            external_id = %attributes.external_id,
            "Identity validated"
        );

        let (user_id, resolution) = self.provisioning.resolve_user(provider, &attributes).await?;
        attempt.user_id = Some(user_id);

        let session = self
            .sessions
            .create(user_id, provider, &attributes, request)
            .await?;

        Ok(SignIn {
            user_id,
            session_id: session.id,
            session_token: session.session_token,
            expires_at: session.expires_at,
            resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{
        auth::{
            jwt::test_support::{TestKeys, id_token_claims},
            saml::test_support::{IDP_SSO_URL, ResponseFixture, authn_request_id, query_param},
        },
        models::{LinkStatus, LoginAttemptStatus},
        services::test_support::{TestApp, oidc_provider},
    };

    async fn saml_login(app: &TestApp) -> (LoginInitiation, RelayState) {
        let initiation = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Saml)
            .await
            .unwrap();
        let raw = app.env.signer.verify(&initiation.state_cookie_value).unwrap();
        (initiation, RelayState::parse(&raw).unwrap())
    }

    fn callback_form(app: &TestApp, relay: &RelayState, fixture: &ResponseFixture) -> SamlCallbackForm {
        SamlCallbackForm {
            saml_response: Some(fixture.encoded(&app.idp_key)),
            relay_state: Some(relay.encode().unwrap()),
        }
    }

    /// Response fixture answering the AuthnRequest in the initiation URL.
    fn fixture_for(app: &TestApp, initiation: &LoginInitiation) -> ResponseFixture {
        let request_id = authn_request_id(&initiation.authorization_url).unwrap();
        ResponseFixture::new(&app.env.sp.entity_id, &app.env.sp.acs_url, &request_id)
    }

    #[tokio::test]
    async fn test_saml_initiation() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;

        assert!(initiation.authorization_url.starts_with(IDP_SSO_URL));
        assert!(initiation.authorization_url.contains("SAMLRequest="));
        assert_eq!(initiation.cookie_name, "saml_relay_state");
        assert_eq!(relay.organization_slug, "acme-corp");
        assert_eq!(relay.nonce.len(), 43);
    }

    #[tokio::test]
    async fn test_saml_relay_state_round_trips_through_cookie() {
        let app = TestApp::with_saml().await;
        let initiation = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Saml)
            .await
            .unwrap();

        let sent = query_param(&initiation.authorization_url, "RelayState").unwrap();
        let stored = app.env.signer.verify(&initiation.state_cookie_value).unwrap();
        assert_eq!(sent, stored);
        assert_eq!(RelayState::parse(&sent).unwrap().organization_slug, "acme-corp");

        // The AuthnRequest ID is resolvable from the relay nonce alone
        let request_id = authn_request_id(&initiation.authorization_url).unwrap();
        let nonce = RelayState::parse(&sent).unwrap().nonce;
        assert_eq!(
            app.db
                .authn_requests()
                .pending(&nonce, app.provider_id, Utc::now())
                .await
                .unwrap(),
            Some(request_id)
        );
    }

    #[tokio::test]
    async fn test_oauth_state_round_trips_through_cookie() {
        let keys = TestKeys::generate("kid-1");
        let server = mock_idp(&keys).await;
        let app = TestApp::with_provider(oidc_provider(&server.uri())).await;

        let first = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Oidc)
            .await
            .unwrap();
        let sent = query_param(&first.authorization_url, "state").unwrap();
        let stored = app.env.signer.verify(&first.state_cookie_value).unwrap();
        assert_eq!(sent, stored);
        assert_eq!(OAuthState::parse(&sent).unwrap().organization_slug, "acme-corp");
        assert_eq!(first.cookie_name, "oidc_state");
        assert_eq!(
            query_param(&first.authorization_url, "nonce"),
            Some(app.env.signer.derive_nonce(&stored))
        );

        let second = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Oidc)
            .await
            .unwrap();
        assert_ne!(query_param(&second.authorization_url, "state"), Some(sent));
    }

    #[tokio::test]
    async fn test_concurrent_initiations_get_distinct_state() {
        let app = TestApp::with_saml().await;
        let (a, b) = tokio::join!(
            app.services.login.initiate("acme-corp", SsoProtocol::Saml),
            app.services.login.initiate("acme-corp", SsoProtocol::Saml)
        );
        assert_ne!(a.unwrap().state_cookie_value, b.unwrap().state_cookie_value);
    }

    #[tokio::test]
    async fn test_initiation_errors() {
        let app = TestApp::with_saml().await;
        let login = &app.services.login;

        assert!(matches!(
            login.initiate("  ", SsoProtocol::Saml).await,
            Err(SsoError::InvalidRequest(_))
        ));
        assert!(matches!(
            login.initiate("globex", SsoProtocol::Saml).await,
            Err(SsoError::OrganizationNotFound(_))
        ));
        assert!(matches!(
            login.initiate("acme-corp", SsoProtocol::Azure).await,
            Err(SsoError::ProviderNotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn test_saml_round_trip() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));

        let sign_in = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap();
        assert_eq!(sign_in.resolution, Resolution::Provisioned);

        let session = app
            .services
            .sessions
            .validate(&sign_in.session_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.sso_session_id, "_session_42");

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Success);
        assert_eq!(attempts[0].user_id, Some(sign_in.user_id));
        assert_eq!(attempts[0].email.as_deref(), Some("jane.doe@acme-corp.com"));
    }

    #[tokio::test]
    async fn test_saml_replay_rejected() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));
        let cookie = Some(initiation.state_cookie_value.as_str());

        app.services
            .login
            .complete_saml(&form, cookie, &app.request())
            .await
            .unwrap();
        let err = app
            .services
            .login
            .complete_saml(&form, cookie, &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::ReplayDetected(_)));

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(
            attempts
                .iter()
                .filter(|a| a.status == LoginAttemptStatus::Rejected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_saml_state_mismatch_creates_nothing() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));

        // Cookie from a different login
        let (other, _) = saml_login(&app).await;
        let err = app
            .services
            .login
            .complete_saml(&form, Some(&other.state_cookie_value), &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::StateMismatch(_)));

        // No cookie at all
        let err = app
            .services
            .login
            .complete_saml(&form, None, &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::StateMismatch(_)));

        // Forged cookie signature
        let forged = format!("{}x", initiation.state_cookie_value);
        assert!(
            app.services
                .login
                .complete_saml(&form, Some(&forged), &app.request())
                .await
                .is_err()
        );

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.status == LoginAttemptStatus::Rejected
            && a.error_code.as_deref() == Some("STATE_MISMATCH")
            && a.organization_id == Some(app.org_id)));
        assert_eq!(app.db.profiles().count_by_org(app.org_id).await.unwrap(), 0);
        assert!(app.services.sessions.list_active(app.org_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saml_invalid_assertion_is_audited() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;
        let mut fixture = fixture_for(&app, &initiation);
        fixture.audience = "https://someone-else.example.com".into();
        let form = callback_form(&app, &relay, &fixture);

        let err = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::AudienceMismatch(_)));

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Rejected);
        assert_eq!(attempts[0].sso_provider_id, Some(app.provider_id));
    }

    #[tokio::test]
    async fn test_saml_domain_policy_failure() {
        let app = TestApp::with_saml_domains(vec!["globex.com".into()]).await;
        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));

        let err = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::DomainNotAllowed(ref d) if d == "acme-corp.com"));

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Failed);
        assert_eq!(app.db.profiles().count_by_org(app.org_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saml_double_at_email_cannot_pass_domain_list() {
        let app = TestApp::with_saml_domains(vec!["acme.com".into()]).await;
        let (initiation, relay) = saml_login(&app).await;
        let mut fixture = fixture_for(&app, &initiation);
        fixture.name_id = "mallory@evil.com@acme.com".into();
        fixture.email = Some("mallory@evil.com@acme.com".into());
        let form = callback_form(&app, &relay, &fixture);

        let err = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::MissingAttribute(ref a) if a == "email"));

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Failed);
        assert_eq!(app.db.profiles().count_by_org(app.org_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saml_suspended_link_is_failed_attempt() {
        let app = TestApp::with_saml().await;
        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));
        let sign_in = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap();

        let mappings = app.db.identity_mappings().list_by_user(sign_in.user_id).await.unwrap();
        app.db
            .identity_mappings()
            .set_link_status(mappings[0].id, LinkStatus::Suspended)
            .await
            .unwrap();

        let (initiation, relay) = saml_login(&app).await;
        let form = callback_form(&app, &relay, &fixture_for(&app, &initiation));
        let err = app
            .services
            .login
            .complete_saml(&form, Some(&initiation.state_cookie_value), &app.request())
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::IdentityLinkInactive(ref s) if s == "suspended"));
        assert_ne!(err.public_message(), crate::auth::UNKNOWN_ERROR);

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 2);
        let refused = attempts
            .iter()
            .find(|a| a.status != LoginAttemptStatus::Success)
            .expect("refused attempt");
        assert_eq!(refused.status, LoginAttemptStatus::Failed);
        assert_eq!(refused.error_code.as_deref(), Some("IDENTITY_LINK_INACTIVE"));
        assert_eq!(
            app.db.identity_mappings().list_by_user(sign_in.user_id).await.unwrap().len(),
            1
        );
    }

    /// Discovery and JWKS for a mock IdP. The token endpoint is mounted by
    /// each test once it knows the nonce.
    async fn mock_idp(keys: &TestKeys) -> MockServer {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": base,
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "jwks_uri": format!("{base}/jwks"),
                "userinfo_endpoint": format!("{base}/userinfo"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "okta-user-1",
                "email": "jane.userinfo@acme-corp.com",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&keys.jwks))
            .mount(&server)
            .await;
        server
    }

    /// Run an OIDC login against a mock IdP, minting the ID token with the
    /// given nonce (default: the one derived from the state) and audience.
    async fn oidc_flow(
        nonce: Option<&str>,
        audience: Option<&str>,
        adjust_claims: impl FnOnce(&mut serde_json::Value),
    ) -> (TestApp, Result<SignIn, SsoError>) {
        let keys = TestKeys::generate("kid-1");
        let server = mock_idp(&keys).await;
        let app = TestApp::with_provider(oidc_provider(&server.uri())).await;

        let initiation = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Oidc)
            .await
            .unwrap();
        assert!(initiation.authorization_url.starts_with(&format!("{}/authorize?", server.uri())));
        let state = app.env.signer.verify(&initiation.state_cookie_value).unwrap();

        let derived_nonce = app.env.signer.derive_nonce(&state);
        let mut claims = id_token_claims(
            &server.uri(),
            audience.unwrap_or("test-client"),
            nonce.unwrap_or(derived_nonce.as_str()),
        );
        claims["sub"] = json!("okta-user-1");
        adjust_claims(&mut claims);
        let id_token = keys.sign(&claims);
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "id_token": id_token,
            })))
            .mount(&server)
            .await;

        let params = OAuthCallbackParams {
            code: Some("auth-code".into()),
            state: Some(state.clone()),
            ..Default::default()
        };
        let outcome = app
            .services
            .login
            .complete_oauth(
                SsoProtocol::Oidc,
                &params,
                Some(&initiation.state_cookie_value),
                &app.request(),
            )
            .await;
        (app, outcome)
    }

    #[tokio::test]
    async fn test_oidc_round_trip() {
        let (app, outcome) = oidc_flow(None, None, |_| {}).await;
        let sign_in = outcome.unwrap();
        assert_eq!(sign_in.resolution, Resolution::Provisioned);

        let session = app
            .services
            .sessions
            .validate(&sign_in.session_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.sso_session_id, "okta-user-1");

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Success);
        assert_eq!(attempts[0].email.as_deref(), Some("jane.doe@acme-corp.com"));
    }

    #[tokio::test]
    async fn test_oidc_email_from_userinfo() {
        let (app, outcome) = oidc_flow(None, None, |claims| {
            if let Some(claims) = claims.as_object_mut() {
                claims.remove("email");
            }
        })
        .await;
        outcome.unwrap();

        let attempts = app.attempts().await;
        assert_eq!(attempts[0].status, LoginAttemptStatus::Success);
        assert_eq!(attempts[0].email.as_deref(), Some("jane.userinfo@acme-corp.com"));
    }

    #[tokio::test]
    async fn test_oidc_bad_nonce_rejected() {
        let (app, outcome) = oidc_flow(Some("attacker-nonce"), None, |_| {}).await;
        assert!(matches!(outcome, Err(SsoError::InvalidToken(_))));

        let attempts = app.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, LoginAttemptStatus::Rejected);
        assert_eq!(app.db.profiles().count_by_org(app.org_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oidc_bad_audience_rejected() {
        let (app, outcome) = oidc_flow(None, Some("another-client"), |_| {}).await;
        assert!(matches!(outcome, Err(SsoError::AudienceMismatch(_))));
        assert_eq!(app.attempts().await[0].status, LoginAttemptStatus::Rejected);
    }

    #[tokio::test]
    async fn test_oauth_idp_error_is_failed_attempt() {
        let keys = TestKeys::generate("kid-1");
        let server = mock_idp(&keys).await;
        let app = TestApp::with_provider(oidc_provider(&server.uri())).await;
        let initiation = app
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Oidc)
            .await
            .unwrap();
        let state = app.env.signer.verify(&initiation.state_cookie_value).unwrap();

        let params = OAuthCallbackParams {
            state: Some(state),
            error: Some("access_denied".into()),
            error_description: Some("user cancelled".into()),
            ..Default::default()
        };
        let err = app
            .services
            .login
            .complete_oauth(
                SsoProtocol::Oidc,
                &params,
                Some(&initiation.state_cookie_value),
                &app.request(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::IdpRejected(ref m) if m.contains("access_denied")));
        assert_eq!(app.attempts().await[0].status, LoginAttemptStatus::Failed);
    }
}
