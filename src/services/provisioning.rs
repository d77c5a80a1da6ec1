use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::SsoError,
    db::{DbError, DbPool},
    models::{
        CreateIdentityMapping, LinkStatus, NormalizedAttributes, ProvisionUser, SsoProvider,
    },
};

/// Times the lookup chain restarts after losing an insert race.
const MAX_LINK_ATTEMPTS: usize = 3;

/// How an external identity was resolved to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An active identity mapping already existed.
    ExistingLink,
    /// An existing profile with the same email was linked.
    LinkedByEmail,
    /// A new user was created.
    Provisioned,
}

/// Maps validated IdP attributes onto an internal user.
#[derive(Clone)]
pub struct ProvisioningService {
    db: Arc<DbPool>,
    default_role: String,
}

impl ProvisioningService {
    pub fn new(db: Arc<DbPool>, default_role: impl Into<String>) -> Self {
        Self {
            db,
            default_role: default_role.into(),
        }
    }

    /// Resolve the user for a verified login. Lookups run in a fixed order
    /// and the first hit wins: existing link, profile by email, auto-provision.
    pub async fn resolve_user(
        &self,
        provider: &SsoProvider,
        attributes: &NormalizedAttributes,
    ) -> Result<(Uuid, Resolution), SsoError> {
        provider
            .check_email_domain(&attributes.email)
            .map_err(SsoError::DomainNotAllowed)?;

        let claims = serde_json::to_value(attributes)
            .map_err(|e| SsoError::Internal(format!("Failed to serialize claims: {}", e)))?;

        for attempt in 1..=MAX_LINK_ATTEMPTS {
            match self.try_resolve(provider, attributes, &claims).await {
                Err(SsoError::Database(DbError::Conflict(reason))) => {
                    tracing::debug!(
                        provider_id = %provider.id,
                        attempt,
                        reason = %reason,
                        "Identity link raced with a concurrent login, retrying"
                    );
                }
                other => return other,
            }
        }

        Err(SsoError::Internal(
            "identity link kept conflicting with concurrent logins".into(),
        ))
    }

    async fn try_resolve(
        &self,
        provider: &SsoProvider,
        attributes: &NormalizedAttributes,
        claims: &serde_json::Value,
    ) -> Result<(Uuid, Resolution), SsoError> {
        let now = chrono::Utc::now();

        if let Some(mapping) = self
            .db
            .identity_mappings()
            .find(provider.id, &attributes.external_id)
            .await?
        {
            // A disabled link must not fall through to linking by email.
            if mapping.link_status != LinkStatus::Active {
                tracing::warn!(
                    user_id = %mapping.user_id,
                    provider_id = %provider.id,
                    link_status = mapping.link_status.as_str(),
                    "Login through an inactive identity link"
                );
                return Err(SsoError::IdentityLinkInactive(
                    mapping.link_status.as_str().to_string(),
                ));
            }
            self.db
                .identity_mappings()
                .record_login(mapping.id, &attributes.email, claims, now)
                .await?;
            return Ok((mapping.user_id, Resolution::ExistingLink));
        }

        if let Some(profile) = self
            .db
            .profiles()
            .find_by_email(provider.organization_id, &attributes.email)
            .await?
        {
            self.db
                .identity_mappings()
                .create(CreateIdentityMapping {
                    user_id: profile.id,
                    sso_provider_id: provider.id,
                    provider_user_id: attributes.external_id.clone(),
                    provider_email: attributes.email.clone(),
                    provider_username: None,
                    claims: claims.clone(),
                })
                .await?;
            tracing::info!(
                user_id = %profile.id,
                provider_id = %provider.id,
                "Linked SSO identity to existing profile"
            );
            return Ok((profile.id, Resolution::LinkedByEmail));
        }

        if !provider.auto_provision_users {
            return Err(SsoError::AutoProvisioningDisabled);
        }

        let (profile, _mapping) = self
            .db
            .profiles()
            .provision(ProvisionUser {
                organization_id: provider.organization_id,
                sso_provider_id: provider.id,
                attributes: attributes.clone(),
                claims: claims.clone(),
                metadata: json!({
                    "sso_provider": provider.id,
                    "external_id": attributes.external_id,
                }),
                role_slug: self.default_role.clone(),
            })
            .await?;
        tracing::info!(
            user_id = %profile.id,
            provider_id = %provider.id,
            org_id = %provider.organization_id,
            "Auto-provisioned SSO user"
        );
        Ok((profile.id, Resolution::Provisioned))
    }
}
