use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::common::conflict_on_unique;
use crate::db::{error::DbResult, repos::AuthnRequestRepo};

pub struct SqliteAuthnRequestRepo {
    pool: SqlitePool,
}

impl SqliteAuthnRequestRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthnRequestRepo for SqliteAuthnRequestRepo {
    async fn record(
        &self,
        request_id: &str,
        provider_id: Uuid,
        relay_nonce: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saml_authn_requests (id, sso_provider_id, relay_nonce, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(provider_id.to_string())
        .bind(relay_nonce)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || "AuthnRequest ID already issued".to_string()))?;

        Ok(())
    }

    async fn pending(
        &self,
        relay_nonce: &str,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM saml_authn_requests
            WHERE relay_nonce = ? AND sso_provider_id = ? AND consumed_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(relay_nonce)
        .bind(provider_id.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn consume(
        &self,
        request_id: &str,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        // Single statement so two concurrent callbacks cannot both succeed
        let result = sqlx::query(
            r#"
            UPDATE saml_authn_requests
            SET consumed_at = ?
            WHERE id = ? AND sso_provider_id = ? AND consumed_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(request_id)
        .bind(provider_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM saml_authn_requests WHERE expires_at <= ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
