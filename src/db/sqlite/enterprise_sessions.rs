use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_json, parse_uuid};
use crate::{
    db::{error::DbResult, repos::EnterpriseSessionRepo},
    models::{CreateEnterpriseSession, EnterpriseSession},
};

const SESSION_COLUMNS: &str = "id, user_id, organization_id, sso_provider_id, session_token, \
     sso_session_id, claims, ip_address, user_agent, last_activity_at, expires_at, created_at";

pub struct SqliteEnterpriseSessionRepo {
    pool: SqlitePool,
}

impl SqliteEnterpriseSessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<EnterpriseSession> {
        Ok(EnterpriseSession {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            organization_id: parse_uuid(&row.get::<String, _>("organization_id"))?,
            sso_provider_id: parse_uuid(&row.get::<String, _>("sso_provider_id"))?,
            session_token: row.get("session_token"),
            sso_session_id: row.get("sso_session_id"),
            claims: parse_json(&row.get::<String, _>("claims"))?,
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            last_activity_at: row.get("last_activity_at"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl EnterpriseSessionRepo for SqliteEnterpriseSessionRepo {
    async fn create(&self, input: CreateEnterpriseSession) -> DbResult<EnterpriseSession> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO enterprise_sessions (
                id, user_id, organization_id, sso_provider_id, session_token, sso_session_id,
                claims, ip_address, user_agent, last_activity_at, expires_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.user_id.to_string())
        .bind(input.organization_id.to_string())
        .bind(input.sso_provider_id.to_string())
        .bind(&input.session_token)
        .bind(&input.sso_session_id)
        .bind(serde_json::to_string(&input.claims)?)
        .bind(&input.ip_address)
        .bind(&input.user_agent)
        .bind(now)
        .bind(input.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(EnterpriseSession {
            id,
            user_id: input.user_id,
            organization_id: input.organization_id,
            sso_provider_id: input.sso_provider_id,
            session_token: input.session_token,
            sso_session_id: input.sso_session_id,
            claims: input.claims,
            ip_address: input.ip_address,
            user_agent: input.user_agent,
            last_activity_at: now,
            expires_at: input.expires_at,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<EnterpriseSession>> {
        let query = format!(
            "SELECT {} FROM enterprise_sessions WHERE id = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_token(&self, token: &str) -> DbResult<Option<EnterpriseSession>> {
        let query = format!(
            "SELECT {} FROM enterprise_sessions WHERE session_token = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE enterprise_sessions SET last_activity_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM enterprise_sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_sso_session(
        &self,
        provider_id: Uuid,
        sso_session_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM enterprise_sessions WHERE sso_provider_id = ? AND sso_session_id = ?",
        )
        .bind(provider_id.to_string())
        .bind(sso_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM enterprise_sessions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM enterprise_sessions WHERE expires_at <= ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_active(
        &self,
        org_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<EnterpriseSession>> {
        let query = format!(
            r#"
            SELECT {} FROM enterprise_sessions
            WHERE organization_id = ? AND expires_at > ?
            ORDER BY last_activity_at DESC
            "#,
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(org_id.to_string())
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn count_by_org(&self, org_id: Uuid) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM enterprise_sessions WHERE organization_id = ?",
        )
        .bind(org_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }
}
