use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateEnterpriseSession, EnterpriseSession},
};

#[async_trait]
pub trait EnterpriseSessionRepo: Send + Sync {
    async fn create(&self, input: CreateEnterpriseSession) -> DbResult<EnterpriseSession>;

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<EnterpriseSession>>;

    async fn get_by_token(&self, token: &str) -> DbResult<Option<EnterpriseSession>>;

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Returns false when no such session existed.
    async fn delete(&self, id: Uuid) -> DbResult<bool>;

    /// Revoke every session created from one IdP session.
    async fn delete_by_sso_session(&self, provider_id: Uuid, sso_session_id: &str)
    -> DbResult<u64>;

    async fn delete_by_user(&self, user_id: Uuid) -> DbResult<u64>;

    /// Drop sessions that expired at or before `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64>;

    /// Unexpired sessions of an organization, most recently
    /// active first.
    async fn list_active(&self, org_id: Uuid, now: DateTime<Utc>) -> DbResult<Vec<EnterpriseSession>>;

    async fn count_by_org(&self, org_id: Uuid) -> DbResult<i64>;
}
