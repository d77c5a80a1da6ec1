use std::sync::Arc;

use uuid::Uuid;

use crate::{
    auth::SsoError,
    db::{DbError, DbPool, DbResult},
    models::{
        CreateSsoProvider, Organization, ProviderStatus, SsoProtocol, SsoProvider,
        UpdateSsoProvider,
    },
};

/// Provider registry: login-time lookup plus the admin operations on
/// per-organization IdP configuration.
#[derive(Clone)]
pub struct SsoProviderService {
    db: Arc<DbPool>,
}

impl SsoProviderService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolve the organization and its active default provider for a
    /// protocol route. Read fresh on every call.
    pub async fn get_provider_for_organization(
        &self,
        organization_slug: &str,
        protocol: SsoProtocol,
    ) -> Result<(Organization, SsoProvider), SsoError> {
        let org = self
            .db
            .organizations()
            .get_by_slug(organization_slug)
            .await?
            .ok_or_else(|| SsoError::OrganizationNotFound(organization_slug.to_string()))?;

        let provider = self
            .db
            .sso_providers()
            .find_active_default(org.id, protocol.provider_types())
            .await?
            .ok_or_else(|| SsoError::ProviderNotConfigured {
                slug: organization_slug.to_string(),
                protocol: protocol.as_str().to_string(),
            })?;

        Ok((org, provider))
    }

    /// Create a provider in `draft` status.
    pub async fn create(&self, org_id: Uuid, input: CreateSsoProvider) -> DbResult<SsoProvider> {
        let provider = self.db.sso_providers().create(org_id, input).await?;
        tracing::info!(
            provider_id = %provider.id,
            org_id = %org_id,
            provider_type = %provider.provider_type(),
            "SSO provider created"
        );
        Ok(provider)
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Option<SsoProvider>> {
        self.db.sso_providers().get_by_id(id).await
    }

    /// Providers of an organization, newest first.
    pub async fn list(&self, org_id: Uuid) -> DbResult<Vec<SsoProvider>> {
        self.db.sso_providers().list_by_org(org_id).await
    }

    /// Partial update. A redacted or empty client secret keeps the stored one.
    pub async fn update(&self, id: Uuid, mut input: UpdateSsoProvider) -> DbResult<SsoProvider> {
        if let Some(config) = input.config.as_mut() {
            let existing = self.get(id).await?.ok_or(DbError::NotFound)?;
            config.keep_secret_from(&existing.config);
        }
        self.db.sso_providers().update(id, input).await
    }

    pub async fn set_status(&self, id: Uuid, status: ProviderStatus) -> DbResult<SsoProvider> {
        let provider = self.db.sso_providers().set_status(id, status).await?;
        tracing::info!(provider_id = %id, status = status.as_str(), "SSO provider status changed");
        Ok(provider)
    }

    /// Make `id` the organization's only default provider.
    pub async fn set_default(&self, org_id: Uuid, id: Uuid) -> DbResult<SsoProvider> {
        self.db.sso_providers().set_default(org_id, id).await
    }

    /// Soft delete; sessions referencing the provider stay intact.
    pub async fn delete(&self, id: Uuid) -> DbResult<()> {
        self.db.sso_providers().soft_delete(id).await?;
        tracing::info!(provider_id = %id, "SSO provider deleted");
        Ok(())
    }
}
