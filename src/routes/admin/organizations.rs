use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_valid::Valid;

use super::{AdminError, get_services, organization_by_slug};
use crate::{
    AppState,
    models::{CreateOrganization, Organization},
};

/// Create an organization
#[tracing::instrument(name = "admin.organizations.create", skip(state, input), fields(slug = %input.slug))]
pub async fn create(
    State(state): State<AppState>,
    Valid(Json(input)): Valid<Json<CreateOrganization>>,
) -> Result<(StatusCode, Json<Organization>), AdminError> {
    let services = get_services(&state)?;
    let org = services.organizations.create(input).await?;
    tracing::info!(org_id = %org.id, slug = %org.slug, "Organization created");
    Ok((StatusCode::CREATED, Json(org)))
}

/// Get an organization by slug
#[tracing::instrument(name = "admin.organizations.get", skip(state))]
pub async fn get(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Organization>, AdminError> {
    let services = get_services(&state)?;
    Ok(Json(organization_by_slug(services, &slug).await?))
}
