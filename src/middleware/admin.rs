//! Admin API authentication.
//!
//! Admin routes are protected by a single static bearer token from
//! `[admin] api_token`. The routes are not mounted at all when no token is
//! configured.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{AppState, routes::admin::AdminError};

/// Reject requests that do not carry the configured admin token.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin.api_token.as_deref() else {
        return AdminError::Unauthorized.into_response();
    };

    let authorized = extract_api_key(req.headers())
        .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if !authorized {
        tracing::warn!(
            path = %req.uri().path(),
            "Rejected admin request with missing or invalid token"
        );
        return AdminError::Unauthorized.into_response();
    }

    next.run(req).await
}

/// Extract API key from request headers.
///
/// Checks in order:
/// 1. `Authorization: Bearer <key>`
/// 2. `X-API-Key: <key>`
fn extract_api_key(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(key) = auth_str.strip_prefix("Bearer ")
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    if let Some(api_key_header) = headers.get("X-API-Key")
        && let Ok(key) = api_key_header.to_str()
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    None
}
