use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{IdentityProviderMapping, Profile, ProvisionUser},
};

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Profile>>;

    /// Case-insensitive email lookup within one organization. When several
    /// profiles share the email, the oldest wins.
    async fn find_by_email(&self, org_id: Uuid, email: &str) -> DbResult<Option<Profile>>;

    /// Create identity, profile, identity mapping and role assignment in one
    /// transaction. A `Conflict` means the external identity was linked
    /// concurrently; nothing is written in that case.
    async fn provision(&self, input: ProvisionUser) -> DbResult<(Profile, IdentityProviderMapping)>;

    async fn count_by_org(&self, org_id: Uuid) -> DbResult<i64>;

    /// Role slugs held by a user in an organization.
    async fn list_roles(&self, user_id: Uuid, org_id: Uuid) -> DbResult<Vec<String>>;
}
