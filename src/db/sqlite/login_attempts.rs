use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_enum, parse_optional_uuid, parse_uuid};
use crate::{
    db::{error::DbResult, repos::LoginAttemptRepo},
    models::{CreateLoginAttempt, SsoLoginAttempt},
};

const ATTEMPT_COLUMNS: &str = "id, organization_id, sso_provider_id, user_id, provider_user_id, \
     email, status, failure_reason, error_code, ip_address, user_agent, attempted_at";

pub struct SqliteLoginAttemptRepo {
    pool: SqlitePool,
}

impl SqliteLoginAttemptRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<SsoLoginAttempt> {
        Ok(SsoLoginAttempt {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            organization_id: parse_optional_uuid(row.get("organization_id"))?,
            sso_provider_id: parse_optional_uuid(row.get("sso_provider_id"))?,
            user_id: parse_optional_uuid(row.get("user_id"))?,
            provider_user_id: row.get("provider_user_id"),
            email: row.get("email"),
            status: parse_enum(&row.get::<String, _>("status"))?,
            failure_reason: row.get("failure_reason"),
            error_code: row.get("error_code"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            attempted_at: row.get("attempted_at"),
        })
    }
}

#[async_trait]
impl LoginAttemptRepo for SqliteLoginAttemptRepo {
    async fn create(&self, input: CreateLoginAttempt) -> DbResult<SsoLoginAttempt> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sso_login_attempts (
                id, organization_id, sso_provider_id, user_id, provider_user_id, email,
                status, failure_reason, error_code, ip_address, user_agent, attempted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.organization_id.map(|id| id.to_string()))
        .bind(input.sso_provider_id.map(|id| id.to_string()))
        .bind(input.user_id.map(|id| id.to_string()))
        .bind(&input.provider_user_id)
        .bind(&input.email)
        .bind(input.status.as_str())
        .bind(&input.failure_reason)
        .bind(&input.error_code)
        .bind(&input.ip_address)
        .bind(&input.user_agent)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(SsoLoginAttempt {
            id,
            organization_id: input.organization_id,
            sso_provider_id: input.sso_provider_id,
            user_id: input.user_id,
            provider_user_id: input.provider_user_id,
            email: input.email,
            status: input.status,
            failure_reason: input.failure_reason,
            error_code: input.error_code,
            ip_address: input.ip_address,
            user_agent: input.user_agent,
            attempted_at: now,
        })
    }

    async fn list_by_org(&self, org_id: Uuid, limit: i64) -> DbResult<Vec<SsoLoginAttempt>> {
        let query = format!(
            r#"
            SELECT {} FROM sso_login_attempts
            WHERE organization_id = ?
            ORDER BY attempted_at DESC, id DESC
            LIMIT ?
            "#,
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(org_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn list_recent(&self, limit: i64) -> DbResult<Vec<SsoLoginAttempt>> {
        let query = format!(
            r#"
            SELECT {} FROM sso_login_attempts
            ORDER BY attempted_at DESC, id DESC
            LIMIT ?
            "#,
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;

        rows.iter().map(Self::parse_row).collect()
    }
}
