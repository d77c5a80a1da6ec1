use std::sync::Arc;

use super::{SessionService, SsoEnvironment, SsoProviderService};
use crate::{
    auth::{
        RelayState, SsoError,
        oidc::OAuthProvider,
        saml::{self, Binding, IdentityProvider},
        xmldsig::TrustedKeys,
    },
    db::DbPool,
    models::{EnterpriseSession, NormalizedAttributes, ProviderConfig, SsoProtocol, SsoProvider},
};

/// Result of a user-initiated logout.
#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    /// Whether a local session was deleted.
    pub revoked: bool,
    /// IdP logout URL to send the browser to, when single logout was asked
    /// for and the IdP supports it.
    pub logout_url: Option<String>,
    /// Where to land after logout when there is no IdP hop.
    pub return_url: String,
}

/// An IdP-initiated SAML LogoutRequest as received.
#[derive(Debug, Clone)]
pub struct SloRequest {
    pub saml_request: String,
    pub binding: Binding,
    /// Raw query string for HTTP-Redirect signature checks.
    pub raw_query: Option<String>,
    pub relay_state: Option<String>,
    /// Organization slug given explicitly on the SLO URL.
    pub organization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SloOutcome {
    pub revoked: u64,
    /// LogoutResponse redirect back to the IdP.
    pub response_url: Option<String>,
}

#[derive(Clone)]
pub struct LogoutService {
    db: Arc<DbPool>,
    env: SsoEnvironment,
    registry: SsoProviderService,
    sessions: SessionService,
}

impl LogoutService {
    pub fn new(
        db: Arc<DbPool>,
        env: SsoEnvironment,
        registry: SsoProviderService,
        sessions: SessionService,
    ) -> Self {
        Self {
            db,
            env,
            registry,
            sessions,
        }
    }

    /// Revoke the caller's session and, when `single_logout` is set, build the
    /// IdP logout URL. Failing to build that URL never fails the logout.
    pub async fn logout(
        &self,
        protocol: SsoProtocol,
        session_token: Option<&str>,
        single_logout: bool,
        return_url: Option<&str>,
        organization_slug: Option<&str>,
    ) -> Result<LogoutOutcome, SsoError> {
        let return_url = self.safe_return_url(return_url);

        let session = match session_token.filter(|t| !t.is_empty()) {
            Some(token) => self.sessions.revoke_by_token(token).await?,
            None => None,
        };

        let logout_url = if single_logout {
            match self.logout_provider(protocol, session.as_ref(), organization_slug).await {
                Some(provider) => self
                    .idp_logout_url(protocol, &provider, session.as_ref(), &return_url)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            provider_id = %provider.id,
                            error = %e,
                            "Could not build IdP logout URL"
                        );
                        None
                    }),
                None => None,
            }
        } else {
            None
        };

        tracing::info!(
            protocol = protocol.as_str(),
            revoked = session.is_some(),
            single_logout = logout_url.is_some(),
            "SSO logout"
        );

        Ok(LogoutOutcome {
            revoked: session.is_some(),
            logout_url,
            return_url,
        })
    }

    /// The session's own provider, or else the organization's default one.
    async fn logout_provider(
        &self,
        protocol: SsoProtocol,
        session: Option<&EnterpriseSession>,
        organization_slug: Option<&str>,
    ) -> Option<SsoProvider> {
        if let Some(session) = session {
            match self.registry.get(session.sso_provider_id).await {
                Ok(Some(provider)) if protocol.provider_types().contains(&provider.provider_type()) => {
                    return Some(provider);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to load session provider"),
            }
        }

        let slug = organization_slug.filter(|s| !s.is_empty())?;
        match self.registry.get_provider_for_organization(slug, protocol).await {
            Ok((_, provider)) => Some(provider),
            Err(e) => {
                tracing::debug!(org = %slug, error = %e, "No provider for single logout");
                None
            }
        }
    }

    async fn idp_logout_url(
        &self,
        protocol: SsoProtocol,
        provider: &SsoProvider,
        session: Option<&EnterpriseSession>,
        return_url: &str,
    ) -> Result<Option<String>, SsoError> {
        match protocol {
            SsoProtocol::Saml => {
                let ProviderConfig::Saml(idp) = &provider.config else {
                    return Ok(None);
                };
                // SAML LogoutRequest needs the NameID of the session's subject.
                let Some(attributes) = session.and_then(|s| {
                    serde_json::from_value::<NormalizedAttributes>(s.claims.clone()).ok()
                }) else {
                    return Ok(None);
                };
                IdentityProvider::new(idp).logout_request_url(
                    &self.env.sp,
                    &attributes.external_id,
                    attributes.session_index.as_deref(),
                    Some(return_url),
                )
            }
            SsoProtocol::Azure | SsoProtocol::Oidc => {
                OAuthProvider::from_config(&provider.config)?
                    .logout_url(&self.env.http, return_url)
                    .await
            }
        }
    }

    /// Absolute landing URL after logout. Only local paths and same-origin
    /// URLs are honored; anything else lands on the login page.
    pub fn safe_return_url(&self, requested: Option<&str>) -> String {
        let base = self.env.config.base_url();
        let fallback = format!("{}{}?logged_out=true", base, self.env.config.login_path);

        let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) else {
            return fallback;
        };

        if requested.starts_with('/') {
            if requested.starts_with("//") || requested.starts_with("/\\") {
                return fallback;
            }
            return format!("{}{}", base, requested);
        }

        match (url::Url::parse(requested), url::Url::parse(base)) {
            (Ok(target), Ok(base_url)) if target.origin() == base_url.origin() => {
                target.to_string()
            }
            _ => fallback,
        }
    }

    /// Handle a LogoutRequest sent by the IdP: verify it came from the
    /// organization's IdP, revoke the matching sessions and build the
    /// LogoutResponse.
    pub async fn single_logout(&self, request: SloRequest) -> Result<SloOutcome, SsoError> {
        let slug = match request.organization.as_deref().filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => request
                .relay_state
                .as_deref()
                .and_then(|r| RelayState::parse(r).ok())
                .map(|r| r.organization_slug)
                .ok_or_else(|| {
                    SsoError::InvalidRequest("organization could not be determined".into())
                })?,
        };

        let (_org, provider) = self
            .registry
            .get_provider_for_organization(&slug, SsoProtocol::Saml)
            .await?;
        let ProviderConfig::Saml(idp) = &provider.config else {
            return Err(SsoError::ProviderMisconfigured(
                "provider is not a SAML provider".into(),
            ));
        };

        let keys = TrustedKeys::from_pem(&idp.certificate)?;
        let allow_sha1 = self.env.config.allow_sha1_signatures;
        if request.binding == Binding::Redirect {
            let signed = match request.raw_query.as_deref() {
                Some(query) => saml::verify_redirect_signature(query, &keys, allow_sha1)?,
                None => false,
            };
            if !signed {
                tracing::warn!(provider_id = %provider.id, "Accepting unsigned SAML LogoutRequest");
            }
        }

        let logout = saml::parse_logout_request(
            &request.saml_request,
            request.binding,
            Some(&keys),
            allow_sha1,
        )?;
        if logout.issuer != idp.entity_id {
            return Err(SsoError::IssuerMismatch {
                expected: idp.entity_id.clone(),
                actual: logout.issuer,
            });
        }

        let mut revoked = 0;
        for index in &logout.session_indexes {
            revoked += self
                .sessions
                .revoke_by_sso_session_id(provider.id, index)
                .await?;
        }
        if let Some(name_id) = &logout.name_id {
            revoked += self
                .sessions
                .revoke_by_sso_session_id(provider.id, name_id)
                .await?;
            // Sessions keyed by SessionIndex are found through the mapping.
            if logout.session_indexes.is_empty()
                && let Some(mapping) = self
                    .db
                    .identity_mappings()
                    .find_active(provider.id, name_id)
                    .await?
            {
                revoked += self.revoke_provider_sessions(&provider, mapping.user_id).await?;
            }
        }

        tracing::info!(
            provider_id = %provider.id,
            request_id = %logout.id,
            revoked,
            "IdP-initiated logout processed"
        );

        let response_url = IdentityProvider::new(idp).logout_response_url(
            &self.env.sp,
            &logout.id,
            request.relay_state.as_deref(),
        )?;
        Ok(SloOutcome {
            revoked,
            response_url,
        })
    }

    /// Revoke a user's live sessions that came through `provider`.
    async fn revoke_provider_sessions(
        &self,
        provider: &SsoProvider,
        user_id: uuid::Uuid,
    ) -> Result<u64, SsoError> {
        let mut revoked = 0;
        for session in self.sessions.list_active(provider.organization_id).await? {
            if session.user_id == user_id
                && session.sso_provider_id == provider.id
                && self.sessions.revoke(session.id).await?
            {
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
