use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{conflict_on_unique, parse_enum, parse_json, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::SsoProviderRepo,
    },
    models::{
        AttributeMapping, CreateSsoProvider, ProviderStatus, ProviderType, SsoProvider,
        UpdateSsoProvider,
    },
};

const PROVIDER_COLUMNS: &str = "id, organization_id, name, slug, status, is_default, config, \
     attribute_mapping, allowed_domains, auto_provision_users, require_email_verification, \
     created_at, updated_at";

pub struct SqliteSsoProviderRepo {
    pool: SqlitePool,
}

impl SqliteSsoProviderRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<SsoProvider> {
        Ok(SsoProvider {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            organization_id: parse_uuid(&row.get::<String, _>("organization_id"))?,
            name: row.get("name"),
            slug: row.get("slug"),
            status: parse_enum(&row.get::<String, _>("status"))?,
            is_default: row.get::<i32, _>("is_default") != 0,
            config: parse_json(&row.get::<String, _>("config"))?,
            attribute_mapping: parse_json(&row.get::<String, _>("attribute_mapping"))?,
            allowed_domains: parse_json(&row.get::<String, _>("allowed_domains"))?,
            auto_provision_users: row.get::<i32, _>("auto_provision_users") != 0,
            require_email_verification: row.get::<i32, _>("require_email_verification") != 0,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn require(&self, id: Uuid) -> DbResult<SsoProvider> {
        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl SsoProviderRepo for SqliteSsoProviderRepo {
    async fn create(&self, org_id: Uuid, input: CreateSsoProvider) -> DbResult<SsoProvider> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let attribute_mapping = input
            .attribute_mapping
            .unwrap_or_else(AttributeMapping::standard);
        let allowed_domains: Vec<String> = input
            .allowed_domains
            .iter()
            .map(|d| d.to_ascii_lowercase())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO sso_providers (
                id, organization_id, name, slug, provider_type, status, is_default, config,
                attribute_mapping, allowed_domains, auto_provision_users,
                require_email_verification, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(org_id.to_string())
        .bind(&input.name)
        .bind(&input.slug)
        .bind(input.config.provider_type().as_str())
        .bind(ProviderStatus::Draft.as_str())
        .bind(serde_json::to_string(&input.config)?)
        .bind(serde_json::to_string(&attribute_mapping)?)
        .bind(serde_json::to_string(&allowed_domains)?)
        .bind(input.auto_provision_users as i32)
        .bind(input.require_email_verification as i32)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("SSO provider with slug '{}' already exists", input.slug)
            })
        })?;

        Ok(SsoProvider {
            id,
            organization_id: org_id,
            name: input.name,
            slug: input.slug,
            status: ProviderStatus::Draft,
            is_default: false,
            config: input.config,
            attribute_mapping,
            allowed_domains,
            auto_provision_users: input.auto_provision_users,
            require_email_verification: input.require_email_verification,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<SsoProvider>> {
        let query = format!(
            "SELECT {} FROM sso_providers WHERE id = ? AND deleted_at IS NULL",
            PROVIDER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list_by_org(&self, org_id: Uuid) -> DbResult<Vec<SsoProvider>> {
        let query = format!(
            r#"
            SELECT {} FROM sso_providers
            WHERE organization_id = ? AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            "#,
            PROVIDER_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(org_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn find_active_default(
        &self,
        org_id: Uuid,
        types: &[ProviderType],
    ) -> DbResult<Option<SsoProvider>> {
        if types.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; types.len()].join(", ");
        let query = format!(
            r#"
            SELECT {} FROM sso_providers
            WHERE organization_id = ?
              AND provider_type IN ({})
              AND status = 'active'
              AND is_default = 1
              AND deleted_at IS NULL
            LIMIT 1
            "#,
            PROVIDER_COLUMNS, placeholders
        );

        let mut q = sqlx::query(&query).bind(org_id.to_string());
        for t in types {
            q = q.bind(t.as_str());
        }
        let row = q.fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn update(&self, id: Uuid, input: UpdateSsoProvider) -> DbResult<SsoProvider> {
        let existing = self.require(id).await?;

        if let Some(config) = &input.config
            && config.provider_type() != existing.provider_type()
        {
            return Err(DbError::Validation(
                "provider_type cannot be changed after creation".into(),
            ));
        }

        let now = chrono::Utc::now();
        let name = input.name.unwrap_or(existing.name);
        let config = input.config.unwrap_or(existing.config);
        let attribute_mapping = input.attribute_mapping.unwrap_or(existing.attribute_mapping);
        let allowed_domains: Vec<String> = input
            .allowed_domains
            .map(|ds| ds.iter().map(|d| d.to_ascii_lowercase()).collect())
            .unwrap_or(existing.allowed_domains);
        let auto_provision_users = input
            .auto_provision_users
            .unwrap_or(existing.auto_provision_users);
        let require_email_verification = input
            .require_email_verification
            .unwrap_or(existing.require_email_verification);

        sqlx::query(
            r#"
            UPDATE sso_providers
            SET name = ?, config = ?, attribute_mapping = ?, allowed_domains = ?,
                auto_provision_users = ?, require_email_verification = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&name)
        .bind(serde_json::to_string(&config)?)
        .bind(serde_json::to_string(&attribute_mapping)?)
        .bind(serde_json::to_string(&allowed_domains)?)
        .bind(auto_provision_users as i32)
        .bind(require_email_verification as i32)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(SsoProvider {
            name,
            config,
            attribute_mapping,
            allowed_domains,
            auto_provision_users,
            require_email_verification,
            updated_at: now,
            ..existing
        })
    }

    async fn set_status(&self, id: Uuid, status: ProviderStatus) -> DbResult<SsoProvider> {
        let result = sqlx::query(
            r#"
            UPDATE sso_providers
            SET status = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.require(id).await
    }

    async fn set_default(&self, org_id: Uuid, id: Uuid) -> DbResult<SsoProvider> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query(
            r#"
            SELECT 1 FROM sso_providers
            WHERE id = ? AND organization_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(org_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_none() {
            // Dropping the transaction rolls it back
            return Err(DbError::NotFound);
        }

        sqlx::query(
            r#"
            UPDATE sso_providers
            SET is_default = 0, updated_at = ?
            WHERE organization_id = ? AND is_default = 1
            "#,
        )
        .bind(now)
        .bind(org_id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE sso_providers
            SET is_default = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.require(id).await
    }

    async fn soft_delete(&self, id: Uuid) -> DbResult<()> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sso_providers
            SET deleted_at = ?, status = 'inactive', is_default = 0, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
