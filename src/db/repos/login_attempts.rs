use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateLoginAttempt, SsoLoginAttempt},
};

/// Append-only audit trail: rows are never updated or deleted.
#[async_trait]
pub trait LoginAttemptRepo: Send + Sync {
    async fn create(&self, input: CreateLoginAttempt) -> DbResult<SsoLoginAttempt>;

    /// Most recent attempts for an organization, newest first.
    async fn list_by_org(&self, org_id: Uuid, limit: i64) -> DbResult<Vec<SsoLoginAttempt>>;

    /// Most recent attempts across all organizations, newest first.
    async fn list_recent(&self, limit: i64) -> DbResult<Vec<SsoLoginAttempt>>;
}
