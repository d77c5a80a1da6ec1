//! Admin API for tenant onboarding and support: organizations, SSO
//! providers, live sessions and the login-attempt log.

mod error;
pub mod login_attempts;
pub mod organizations;
pub mod sessions;
pub mod sso_providers;

use axum::{
    Router,
    routing::{get, post, put},
};
pub use error::{AdminError, AdminErrorBody};

use crate::{AppState, models::Organization, services::Services};

pub fn get_admin_routes() -> Router<AppState> {
    Router::new().nest("/v1", admin_v1_routes())
}

fn admin_v1_routes() -> Router<AppState> {
    Router::new()
        // Organizations
        .route("/organizations", post(organizations::create))
        .route("/organizations/{slug}", get(organizations::get))
        .route(
            "/organizations/{slug}/sso-providers",
            get(sso_providers::list).post(sso_providers::create),
        )
        .route("/organizations/{slug}/sessions", get(sessions::list))
        .route(
            "/organizations/{slug}/login-attempts",
            get(login_attempts::list),
        )
        // SSO providers
        .route(
            "/sso-providers/{id}",
            get(sso_providers::get)
                .patch(sso_providers::update)
                .delete(sso_providers::delete),
        )
        .route("/sso-providers/{id}/status", put(sso_providers::set_status))
        .route("/sso-providers/{id}/default", post(sso_providers::set_default))
        // Sessions
        .route("/sessions/{id}", axum::routing::delete(sessions::revoke))
}

fn get_services(state: &AppState) -> Result<&Services, AdminError> {
    state.services.as_ref().ok_or(AdminError::ServicesRequired)
}

async fn organization_by_slug(services: &Services, slug: &str) -> Result<Organization, AdminError> {
    services
        .organizations
        .get_by_slug(slug)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("Organization '{}' not found", slug)))
}
