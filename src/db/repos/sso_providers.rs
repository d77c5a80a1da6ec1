use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateSsoProvider, ProviderStatus, ProviderType, SsoProvider, UpdateSsoProvider},
};

#[async_trait]
pub trait SsoProviderRepo: Send + Sync {
    /// Create a provider in `draft` status. Fails with `Conflict` when the
    /// slug is already used in the organization.
    async fn create(&self, org_id: Uuid, input: CreateSsoProvider) -> DbResult<SsoProvider>;

    /// Get a live (not soft-deleted) provider.
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<SsoProvider>>;

    /// All live providers of an organization, newest first.
    async fn list_by_org(&self, org_id: Uuid) -> DbResult<Vec<SsoProvider>>;

    /// The active default provider of an organization whose type is one of
    /// `types`.
    async fn find_active_default(
        &self,
        org_id: Uuid,
        types: &[ProviderType],
    ) -> DbResult<Option<SsoProvider>>;

    async fn update(&self, id: Uuid, input: UpdateSsoProvider) -> DbResult<SsoProvider>;

    async fn set_status(&self, id: Uuid, status: ProviderStatus) -> DbResult<SsoProvider>;

    /// Make `id` the organization's only default provider. Runs in one
    /// transaction; fails with `NotFound` (and changes nothing) when `id` is
    /// not a live provider of `org_id`.
    async fn set_default(&self, org_id: Uuid, id: Uuid) -> DbResult<SsoProvider>;

    /// Soft delete: the row stays for sessions and audit records that
    /// reference it.
    async fn soft_delete(&self, id: Uuid) -> DbResult<()>;
}
