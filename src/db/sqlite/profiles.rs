use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::{
    common::{parse_enum, parse_uuid},
    identity_mappings::insert_mapping,
};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::ProfileRepo,
    },
    models::{
        CreateIdentityMapping, IdentityProviderMapping, Profile, ProfileStatus, ProvisionUser,
    },
};

const PROFILE_COLUMNS: &str = "id, organization_id, email, first_name, last_name, display_name, \
     email_verified, status, created_at, updated_at";

pub struct SqliteProfileRepo {
    pool: SqlitePool,
}

impl SqliteProfileRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<Profile> {
        Ok(Profile {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            organization_id: parse_uuid(&row.get::<String, _>("organization_id"))?,
            email: row.get("email"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            display_name: row.get("display_name"),
            email_verified: row.get::<i32, _>("email_verified") != 0,
            status: parse_enum(&row.get::<String, _>("status"))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ProfileRepo for SqliteProfileRepo {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Profile>> {
        let query = format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn find_by_email(&self, org_id: Uuid, email: &str) -> DbResult<Option<Profile>> {
        let query = format!(
            r#"
            SELECT {} FROM profiles
            WHERE organization_id = ? AND email = ? COLLATE NOCASE
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            PROFILE_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(org_id.to_string())
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn provision(&self, input: ProvisionUser) -> DbResult<(Profile, IdentityProviderMapping)> {
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let attrs = &input.attributes;
        let metadata = serde_json::to_string(&input.metadata)?;

        let mut tx = self.pool.begin().await?;

        let role_id: Option<String> = sqlx::query("SELECT id FROM roles WHERE slug = ?")
            .bind(&input.role_slug)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("id"));
        let role_id = role_id.ok_or_else(|| {
            DbError::Validation(format!("Default role '{}' does not exist", input.role_slug))
        })?;

        sqlx::query(
            r#"
            INSERT INTO auth_identities (id, email, email_verified, metadata, created_at)
            VALUES (?, ?, 1, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(&attrs.email)
        .bind(&metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, organization_id, email, first_name, last_name, display_name,
                email_verified, status, metadata, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, 'active', ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(input.organization_id.to_string())
        .bind(&attrs.email)
        .bind(&attrs.first_name)
        .bind(&attrs.last_name)
        .bind(&attrs.display_name)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // A unique violation here means a concurrent login linked this
        // identity first; returning drops (rolls back) the transaction.
        let mapping = insert_mapping(
            &mut *tx,
            &CreateIdentityMapping {
                user_id,
                sso_provider_id: input.sso_provider_id,
                provider_user_id: attrs.external_id.clone(),
                provider_email: attrs.email.clone(),
                provider_username: None,
                claims: input.claims.clone(),
            },
            now,
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, organization_id, scope_type, created_at)
            VALUES (?, ?, ?, 'global', ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(&role_id)
        .bind(input.organization_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let profile = Profile {
            id: user_id,
            organization_id: input.organization_id,
            email: attrs.email.clone(),
            first_name: attrs.first_name.clone(),
            last_name: attrs.last_name.clone(),
            display_name: attrs.display_name.clone(),
            email_verified: true,
            status: ProfileStatus::Active,
            created_at: now,
            updated_at: now,
        };

        Ok((profile, mapping))
    }

    async fn count_by_org(&self, org_id: Uuid) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM profiles WHERE organization_id = ?")
            .bind(org_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    async fn list_roles(&self, user_id: Uuid, org_id: Uuid) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT r.slug
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ? AND ur.organization_id = ?
            ORDER BY r.slug
            "#,
        )
        .bind(user_id.to_string())
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("slug")).collect())
    }
}
