//! Multi-tenant enterprise SSO: SAML 2.0, Azure AD B2C and OpenID Connect
//! login for organizations, with just-in-time user provisioning and
//! server-side sessions.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_cookies::CookieManagerLayer;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
#[cfg(feature = "server")]
pub mod observability;
pub mod routes;
pub mod services;

use config::{DatabaseConfig, SsoServiceConfig};
use db::DbPool;
use services::{Services, SsoEnvironment};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SsoServiceConfig>,
    /// SP identity, HTTP client and cookie signer.
    pub sso: SsoEnvironment,
    pub db: Option<Arc<DbPool>>,
    /// Present whenever a database is configured.
    pub services: Option<Services>,
}

impl AppState {
    pub async fn new(config: SsoServiceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let sso = SsoEnvironment::from_config(config.sso.clone())?;

        let db = match &config.database {
            DatabaseConfig::None => {
                tracing::warn!("No database configured; SSO routes will return errors");
                None
            }
            DatabaseConfig::Sqlite(sqlite) => {
                let pool = DbPool::from_config(&config.database).await?;
                if sqlite.run_migrations {
                    pool.run_migrations().await?;
                }
                tracing::info!(path = %sqlite.path, "SQLite database connected");
                Some(Arc::new(pool))
            }
        };

        let services = db
            .as_ref()
            .map(|db| Services::new(Arc::clone(db), sso.clone()));

        tracing::debug!(
            sp_entity_id = %sso.sp.entity_id,
            acs_url = %sso.sp.acs_url,
            "SSO environment ready"
        );

        Ok(Self {
            config: Arc::new(config),
            sso,
            db,
            services,
        })
    }

    /// State over a [`services::test_support::TestApp`], with the admin API
    /// enabled when `admin_token` is set.
    #[cfg(test)]
    pub(crate) fn for_test(
        app: &services::test_support::TestApp,
        admin_token: Option<&str>,
    ) -> Self {
        let config = SsoServiceConfig {
            sso: app.env.config.as_ref().clone(),
            admin: config::AdminConfig {
                api_token: admin_token.map(str::to_string),
            },
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            sso: app.env.clone(),
            db: Some(Arc::clone(&app.db)),
            services: Some(app.services.clone()),
        }
    }
}

/// Build the HTTP router.
pub fn build_app(config: &SsoServiceConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .nest("/api/auth", routes::auth_routes());

    if config.admin.api_token.is_some() {
        let admin_routes = routes::admin::get_admin_routes().route_layer(
            axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::admin_auth_middleware,
            ),
        );
        app = app.nest("/admin", admin_routes);
    } else {
        tracing::info!("admin.api_token is not set; admin API disabled");
    }

    app.layer(CookieManagerLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.timeout_secs,
        )))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A panicking handler answers like any other internal failure.
fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    auth::SsoError::Internal("handler panicked".to_string()).into_response()
}
