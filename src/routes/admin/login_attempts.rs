use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::{AdminError, get_services, organization_by_slug};
use crate::{AppState, models::SsoLoginAttempt};

const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    /// Page size, clamped to 1..=500
    pub limit: Option<i64>,
}

/// Most recent login attempts of an organization, newest first
#[tracing::instrument(name = "admin.login_attempts.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<Vec<SsoLoginAttempt>>, AdminError> {
    let services = get_services(&state)?;
    let org = organization_by_slug(services, &slug).await?;
    let attempts = services
        .login_attempts
        .list_by_org(org.id, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(attempts))
}
