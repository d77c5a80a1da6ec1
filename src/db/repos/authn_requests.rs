use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::error::DbResult;

/// Ledger of issued SAML AuthnRequest IDs, used to bind responses to requests
/// and to refuse replays. Each ID is keyed by the nonce of the relay state it
/// was issued with, which keeps the ID out of the RelayState parameter.
#[async_trait]
pub trait AuthnRequestRepo: Send + Sync {
    async fn record(
        &self,
        request_id: &str,
        provider_id: Uuid,
        relay_nonce: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()>;

    /// The unanswered, unexpired request issued with `relay_nonce`.
    async fn pending(
        &self,
        relay_nonce: &str,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>>;

    /// Mark a request as answered. Returns false when the ID is unknown,
    /// belongs to another provider, has expired or was already consumed.
    async fn consume(&self, request_id: &str, provider_id: Uuid, now: DateTime<Utc>)
    -> DbResult<bool>;

    /// Drop entries whose validity window ended before `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64>;
}
