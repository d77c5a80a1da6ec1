mod error;
pub mod repos;
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    organizations: Arc<dyn OrganizationRepo>,
    sso_providers: Arc<dyn SsoProviderRepo>,
    authn_requests: Arc<dyn AuthnRequestRepo>,
    identity_mappings: Arc<dyn IdentityMappingRepo>,
    profiles: Arc<dyn ProfileRepo>,
    sessions: Arc<dyn EnterpriseSessionRepo>,
    login_attempts: Arc<dyn LoginAttemptRepo>,
}

impl CachedRepos {
    fn sqlite(pool: &sqlx::SqlitePool) -> Self {
        Self {
            organizations: Arc::new(sqlite::SqliteOrganizationRepo::new(pool.clone())),
            sso_providers: Arc::new(sqlite::SqliteSsoProviderRepo::new(pool.clone())),
            authn_requests: Arc::new(sqlite::SqliteAuthnRequestRepo::new(pool.clone())),
            identity_mappings: Arc::new(sqlite::SqliteIdentityMappingRepo::new(pool.clone())),
            profiles: Arc::new(sqlite::SqliteProfileRepo::new(pool.clone())),
            sessions: Arc::new(sqlite::SqliteEnterpriseSessionRepo::new(pool.clone())),
            login_attempts: Arc::new(sqlite::SqliteLoginAttemptRepo::new(pool.clone())),
        }
    }
}

/// Connection pool plus the repositories built on it.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Wrap an existing SQLite pool.
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos::sqlite(&pool);
        Self { pool, repos }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn organizations(&self) -> Arc<dyn OrganizationRepo> {
        Arc::clone(&self.repos.organizations)
    }

    pub fn sso_providers(&self) -> Arc<dyn SsoProviderRepo> {
        Arc::clone(&self.repos.sso_providers)
    }

    pub fn authn_requests(&self) -> Arc<dyn AuthnRequestRepo> {
        Arc::clone(&self.repos.authn_requests)
    }

    pub fn identity_mappings(&self) -> Arc<dyn IdentityMappingRepo> {
        Arc::clone(&self.repos.identity_mappings)
    }

    pub fn profiles(&self) -> Arc<dyn ProfileRepo> {
        Arc::clone(&self.repos.profiles)
    }

    pub fn sessions(&self) -> Arc<dyn EnterpriseSessionRepo> {
        Arc::clone(&self.repos.sessions)
    }

    pub fn login_attempts(&self) -> Arc<dyn LoginAttemptRepo> {
        Arc::clone(&self.repos.login_attempts)
    }
}
