use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::{AdminError, get_services, organization_by_slug};
use crate::{AppState, models::EnterpriseSession};

/// Live sessions of an organization
#[tracing::instrument(name = "admin.sessions.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<EnterpriseSession>>, AdminError> {
    let services = get_services(&state)?;
    let org = organization_by_slug(services, &slug).await?;
    Ok(Json(services.sessions.list_active(org.id).await?))
}

/// Force sign-out of one session
#[tracing::instrument(name = "admin.sessions.revoke", skip(state))]
pub async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    let services = get_services(&state)?;
    if !services.sessions.revoke(id).await? {
        return Err(AdminError::NotFound(format!("Session '{}' not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
