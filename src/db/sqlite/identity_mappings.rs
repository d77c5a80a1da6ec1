use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{conflict_on_unique, parse_enum, parse_json, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::IdentityMappingRepo,
    },
    models::{CreateIdentityMapping, IdentityProviderMapping, LinkStatus},
};

pub(super) const MAPPING_COLUMNS: &str = "id, user_id, sso_provider_id, provider_user_id, \
     provider_email, provider_username, claims, link_status, last_login_at, login_count, \
     created_at, updated_at";

pub struct SqliteIdentityMappingRepo {
    pool: SqlitePool,
}

impl SqliteIdentityMappingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(super) fn parse_row(row: &SqliteRow) -> DbResult<IdentityProviderMapping> {
        Ok(IdentityProviderMapping {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            sso_provider_id: parse_uuid(&row.get::<String, _>("sso_provider_id"))?,
            provider_user_id: row.get("provider_user_id"),
            provider_email: row.get("provider_email"),
            provider_username: row.get("provider_username"),
            claims: parse_json(&row.get::<String, _>("claims"))?,
            link_status: parse_enum(&row.get::<String, _>("link_status"))?,
            last_login_at: row.get("last_login_at"),
            login_count: row.get("login_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Insert a mapping on any executor, so provisioning can run it inside its
/// transaction.
pub(super) async fn insert_mapping<'e, E>(
    executor: E,
    input: &CreateIdentityMapping,
    now: DateTime<Utc>,
) -> DbResult<IdentityProviderMapping>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO identity_provider_mapping (
            id, user_id, sso_provider_id, provider_user_id, provider_email,
            provider_username, claims, link_status, last_login_at, login_count,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(input.user_id.to_string())
    .bind(input.sso_provider_id.to_string())
    .bind(&input.provider_user_id)
    .bind(&input.provider_email)
    .bind(&input.provider_username)
    .bind(serde_json::to_string(&input.claims)?)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await
    .map_err(|e| {
        conflict_on_unique(e, || {
            format!(
                "External identity '{}' is already linked for this provider",
                input.provider_user_id
            )
        })
    })?;

    Ok(IdentityProviderMapping {
        id,
        user_id: input.user_id,
        sso_provider_id: input.sso_provider_id,
        provider_user_id: input.provider_user_id.clone(),
        provider_email: input.provider_email.clone(),
        provider_username: input.provider_username.clone(),
        claims: input.claims.clone(),
        link_status: LinkStatus::Active,
        last_login_at: Some(now),
        login_count: 1,
        created_at: now,
        updated_at: now,
    })
}

#[async_trait]
impl IdentityMappingRepo for SqliteIdentityMappingRepo {
    async fn find_active(
        &self,
        provider_id: Uuid,
        provider_user_id: &str,
    ) -> DbResult<Option<IdentityProviderMapping>> {
        let query = format!(
            r#"
            SELECT {} FROM identity_provider_mapping
            WHERE sso_provider_id = ? AND provider_user_id = ? AND link_status = 'active'
            "#,
            MAPPING_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(provider_id.to_string())
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn find(
        &self,
        provider_id: Uuid,
        provider_user_id: &str,
    ) -> DbResult<Option<IdentityProviderMapping>> {
        let query = format!(
            r#"
            SELECT {} FROM identity_provider_mapping
            WHERE sso_provider_id = ? AND provider_user_id = ?
            "#,
            MAPPING_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(provider_id.to_string())
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn set_link_status(
        &self,
        id: Uuid,
        status: LinkStatus,
    ) -> DbResult<IdentityProviderMapping> {
        let query = format!(
            r#"
            UPDATE identity_provider_mapping
            SET link_status = ?, updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            MAPPING_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;

        Self::parse_row(&row)
    }

    async fn create(&self, input: CreateIdentityMapping) -> DbResult<IdentityProviderMapping> {
        insert_mapping(&self.pool, &input, Utc::now()).await
    }

    async fn record_login(
        &self,
        id: Uuid,
        provider_email: &str,
        claims: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> DbResult<IdentityProviderMapping> {
        let query = format!(
            r#"
            UPDATE identity_provider_mapping
            SET provider_email = ?, claims = ?, last_login_at = ?,
                login_count = login_count + 1, updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            MAPPING_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(provider_email)
            .bind(serde_json::to_string(claims)?)
            .bind(at)
            .bind(at)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;

        Self::parse_row(&row)
    }

    async fn list_by_user(&self, user_id: Uuid) -> DbResult<Vec<IdentityProviderMapping>> {
        let query = format!(
            r#"
            SELECT {} FROM identity_provider_mapping
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
            MAPPING_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }
}
