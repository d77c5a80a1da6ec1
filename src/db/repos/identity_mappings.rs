use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateIdentityMapping, IdentityProviderMapping, LinkStatus},
};

#[async_trait]
pub trait IdentityMappingRepo: Send + Sync {
    /// Active link for an external identity.
    async fn find_active(
        &self,
        provider_id: Uuid,
        provider_user_id: &str,
    ) -> DbResult<Option<IdentityProviderMapping>>;

    /// Link for an external identity in any status.
    async fn find(
        &self,
        provider_id: Uuid,
        provider_user_id: &str,
    ) -> DbResult<Option<IdentityProviderMapping>>;

    async fn set_link_status(
        &self,
        id: Uuid,
        status: LinkStatus,
    ) -> DbResult<IdentityProviderMapping>;

    /// Link an external identity to an existing user with `login_count = 1`.
    /// Fails with `Conflict` if the identity is already linked.
    async fn create(&self, input: CreateIdentityMapping) -> DbResult<IdentityProviderMapping>;

    /// Refresh email and claims and count the login.
    async fn record_login(
        &self,
        id: Uuid,
        provider_email: &str,
        claims: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> DbResult<IdentityProviderMapping>;

    async fn list_by_user(&self, user_id: Uuid) -> DbResult<Vec<IdentityProviderMapping>>;
}
