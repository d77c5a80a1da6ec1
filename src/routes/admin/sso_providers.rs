//! Provider CRUD. Responses always carry the redacted configuration, so a
//! client secret written here can never be read back.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_valid::Valid;
use serde::Deserialize;
use uuid::Uuid;

use super::{AdminError, get_services, organization_by_slug};
use crate::{
    AppState,
    models::{CreateSsoProvider, ProviderStatus, SsoProvider, UpdateSsoProvider},
};

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ProviderStatus,
}

/// List an organization's providers
#[tracing::instrument(name = "admin.sso_providers.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<SsoProvider>>, AdminError> {
    let services = get_services(&state)?;
    let org = organization_by_slug(services, &slug).await?;
    let providers = services.sso_providers.list(org.id).await?;
    Ok(Json(providers.into_iter().map(SsoProvider::redacted).collect()))
}

/// Create a provider (starts in `draft` status)
#[tracing::instrument(
    name = "admin.sso_providers.create",
    skip(state, input),
    fields(provider_slug = %input.slug)
)]
pub async fn create(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Valid(Json(input)): Valid<Json<CreateSsoProvider>>,
) -> Result<(StatusCode, Json<SsoProvider>), AdminError> {
    let services = get_services(&state)?;
    let org = organization_by_slug(services, &slug).await?;
    let provider = services.sso_providers.create(org.id, input).await?;
    Ok((StatusCode::CREATED, Json(provider.redacted())))
}

#[tracing::instrument(name = "admin.sso_providers.get", skip(state))]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SsoProvider>, AdminError> {
    let services = get_services(&state)?;
    let provider = services
        .sso_providers
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("SSO provider '{}' not found", id)))?;
    Ok(Json(provider.redacted()))
}

/// Partial update. Sending back the redacted secret keeps the stored one.
#[tracing::instrument(name = "admin.sso_providers.update", skip(state, input))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Valid(Json(input)): Valid<Json<UpdateSsoProvider>>,
) -> Result<Json<SsoProvider>, AdminError> {
    let services = get_services(&state)?;
    let provider = services.sso_providers.update(id, input).await?;
    Ok(Json(provider.redacted()))
}

#[tracing::instrument(name = "admin.sso_providers.delete", skip(state))]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AdminError> {
    let services = get_services(&state)?;
    services.sso_providers.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(name = "admin.sso_providers.set_status", skip(state))]
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<SsoProvider>, AdminError> {
    let services = get_services(&state)?;
    let provider = services.sso_providers.set_status(id, body.status).await?;
    Ok(Json(provider.redacted()))
}

/// Make a provider its organization's default
#[tracing::instrument(name = "admin.sso_providers.set_default", skip(state))]
pub async fn set_default(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SsoProvider>, AdminError> {
    let services = get_services(&state)?;
    let existing = services
        .sso_providers
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("SSO provider '{}' not found", id)))?;
    let provider = services
        .sso_providers
        .set_default(existing.organization_id, id)
        .await?;
    Ok(Json(provider.redacted()))
}
