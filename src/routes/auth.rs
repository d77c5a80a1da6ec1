//! Browser-facing SSO routes, mounted under `/api/auth`.
//!
//! Each protocol gets the same route set under its own prefix; the protocol
//! reaches the handlers as an [`Extension`]:
//!
//! - `/{protocol}/login` - GET redirects to the IdP, POST returns `{authUrl}`
//! - `/{protocol}/callback` - SAML form post or OAuth redirect back
//! - `/{protocol}/logout` - revoke the session, optionally at the IdP
//! - `/saml/slo` - IdP-initiated single logout
//! - `/saml/metadata` - SP metadata for an organization
//! - `/session/activity` - activity ping for the current session

use axum::{
    Extension, Form, Json, Router,
    body::Bytes,
    extract::{Query, RawQuery, State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    AppState,
    auth::{CookiePolicy, SsoError, saml::Binding},
    middleware::ClientContext,
    models::{ProviderConfig, SsoProtocol},
    services::{OAuthCallbackParams, SamlCallbackForm, Services, SloRequest},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .nest("/saml", saml_routes().layer(Extension(SsoProtocol::Saml)))
        .nest("/azure", oauth_routes().layer(Extension(SsoProtocol::Azure)))
        .nest("/oidc", oauth_routes().layer(Extension(SsoProtocol::Oidc)))
        .route("/session/activity", post(session_activity))
}

fn saml_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_redirect).post(login))
        .route("/callback", post(saml_callback).get(saml_callback_get))
        .route("/logout", get(logout_redirect).post(logout))
        .route("/slo", get(saml_slo_redirect).post(saml_slo_post))
        .route("/metadata", get(saml_metadata))
}

fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_redirect).post(login))
        .route("/callback", get(oauth_callback))
        .route("/logout", get(logout_redirect).post(logout))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default, alias = "organization_slug")]
    pub organization_slug: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub auth_url: String,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub org: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default, alias = "single_logout")]
    pub single_logout: bool,
    #[serde(default, alias = "return_url")]
    pub return_url: Option<String>,
    #[serde(default, alias = "organization_slug")]
    pub organization_slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    #[serde(default, alias = "returnUrl")]
    pub return_url: Option<String>,
    pub org: Option<String>,
    /// IdP logout unless explicitly turned off
    #[serde(default, alias = "singleLogout")]
    pub single_logout: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SloParams {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
    #[serde(alias = "org")]
    pub organization: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SloResponse {
    pub success: bool,
    pub revoked: u64,
}

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub org: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn get_services(state: &AppState) -> Result<&Services, SsoError> {
    state
        .services
        .as_ref()
        .ok_or_else(|| SsoError::Internal("SSO requires a configured database".to_string()))
}

fn cookie_policy(state: &AppState) -> CookiePolicy {
    CookiePolicy {
        secure: state.config.sso.secure_cookies(),
    }
}

fn session_token(state: &AppState, cookies: &Cookies) -> Option<String> {
    cookies
        .get(&state.config.sso.cookies.session_cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn clear_session_cookie(state: &AppState, cookies: &Cookies) {
    cookies.remove(cookie_policy(state).removal(&state.config.sso.cookies.session_cookie_name));
}

/// `/login?error={code}`, optionally with URL-encoded details.
fn error_redirect(state: &AppState, code: &str, details: Option<&str>) -> Redirect {
    let mut target = format!("{}?error={}", state.config.sso.login_path, code);
    if let Some(details) = details {
        target.push_str("&details=");
        target.extend(url::form_urlencoded::byte_serialize(details.as_bytes()));
    }
    Redirect::temporary(&target)
}

/// Log a flow failure and send the browser back to the login page.
fn failure_redirect(state: &AppState, protocol: SsoProtocol, err: &SsoError) -> Response {
    if err.status_code().is_server_error() {
        tracing::error!(
            protocol = protocol.as_str(),
            error = %err,
            code = err.error_code(),
            "SSO flow failed"
        );
    } else {
        tracing::warn!(
            protocol = protocol.as_str(),
            error = %err,
            code = err.error_code(),
            "SSO flow rejected"
        );
    }
    error_redirect(
        state,
        &format!("{}_error", protocol.as_str()),
        Some(&err.public_message()),
    )
    .into_response()
}

/// Initiate a login and store its state cookie. Returns the IdP URL.
async fn start_login(
    state: &AppState,
    cookies: &Cookies,
    protocol: SsoProtocol,
    organization_slug: &str,
) -> Result<String, SsoError> {
    let services = get_services(state)?;
    let initiation = services.login.initiate(organization_slug, protocol).await?;
    cookies.add(cookie_policy(state).state_cookie(
        initiation.cookie_name,
        initiation.state_cookie_value,
        state.config.sso.cookies.state_max_age_secs,
        protocol == SsoProtocol::Saml,
    ));
    Ok(initiation.authorization_url)
}

/// Set the session cookie, drop the state cookie and land on the app.
fn finish_sign_in(
    state: &AppState,
    cookies: &Cookies,
    protocol: SsoProtocol,
    session_token: String,
) -> Response {
    let policy = cookie_policy(state);
    cookies.add(policy.session_cookie(
        &state.config.sso.cookies.session_cookie_name,
        session_token,
        state.config.sso.session_duration_secs,
    ));
    cookies.remove(policy.removal(protocol.state_cookie_name()));
    Redirect::temporary(&state.config.sso.post_login_redirect).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────────

/// API-style login: `{organizationSlug}` in, `{authUrl}` out.
///
/// The body is parsed leniently so that an unparseable body gets the same
/// 400 as a missing slug.
#[tracing::instrument(name = "auth.login", skip_all, fields(protocol = %protocol))]
pub async fn login(
    State(state): State<AppState>,
    Extension(protocol): Extension<SsoProtocol>,
    cookies: Cookies,
    body: Bytes,
) -> Response {
    let request: LoginRequest = serde_json::from_slice(&body).unwrap_or_default();
    let Some(slug) = request
        .organization_slug
        .filter(|s| !s.trim().is_empty())
    else {
        return SsoError::InvalidRequest("organizationSlug is required".to_string())
            .into_response();
    };

    match start_login(&state, &cookies, protocol, &slug).await {
        Ok(auth_url) => Json(LoginResponse {
            auth_url,
            success: true,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Browser login: `?org={slug}` redirects to the IdP.
#[tracing::instrument(name = "auth.login_redirect", skip_all, fields(protocol = %protocol))]
pub async fn login_redirect(
    State(state): State<AppState>,
    Extension(protocol): Extension<SsoProtocol>,
    cookies: Cookies,
    Query(query): Query<LoginQuery>,
) -> Response {
    let Some(slug) = query.org.filter(|s| !s.trim().is_empty()) else {
        return error_redirect(&state, "missing_organization", None).into_response();
    };

    match start_login(&state, &cookies, protocol, &slug).await {
        Ok(auth_url) => Redirect::temporary(&auth_url).into_response(),
        Err(e) => failure_redirect(&state, protocol, &e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

/// SAML Assertion Consumer Service (HTTP-POST binding).
#[tracing::instrument(name = "auth.saml.acs", skip_all)]
pub async fn saml_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    ClientContext(request): ClientContext,
    form: Result<Form<SamlCallbackForm>, FormRejection>,
) -> Response {
    let protocol = SsoProtocol::Saml;
    let services = match get_services(&state) {
        Ok(services) => services,
        Err(e) => return failure_redirect(&state, protocol, &e),
    };

    // A malformed body is audited like an empty one.
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let state_cookie = cookies
        .get(protocol.state_cookie_name())
        .map(|c| c.value().to_string());

    match services
        .login
        .complete_saml(&form, state_cookie.as_deref(), &request)
        .await
    {
        Ok(sign_in) => {
            tracing::info!(
                user_id = %sign_in.user_id,
                session_id = %sign_in.session_id,
                "SAML sign-in complete"
            );
            finish_sign_in(&state, &cookies, protocol, sign_in.session_token)
        }
        Err(e) => failure_redirect(&state, protocol, &e),
    }
}

/// Responses must be posted; a GET here is a misconfigured IdP.
pub async fn saml_callback_get(State(state): State<AppState>) -> Redirect {
    error_redirect(&state, "use_post_binding", None)
}

/// Azure AD B2C / OIDC redirect back with `code` and `state`.
#[tracing::instrument(name = "auth.oauth.callback", skip_all, fields(protocol = %protocol))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Extension(protocol): Extension<SsoProtocol>,
    cookies: Cookies,
    ClientContext(request): ClientContext,
    Query(params): Query<OAuthCallbackParams>,
) -> Response {
    let services = match get_services(&state) {
        Ok(services) => services,
        Err(e) => return failure_redirect(&state, protocol, &e),
    };

    let state_cookie = cookies
        .get(protocol.state_cookie_name())
        .map(|c| c.value().to_string());

    match services
        .login
        .complete_oauth(protocol, &params, state_cookie.as_deref(), &request)
        .await
    {
        Ok(sign_in) => {
            tracing::info!(
                user_id = %sign_in.user_id,
                session_id = %sign_in.session_id,
                "OAuth sign-in complete"
            );
            finish_sign_in(&state, &cookies, protocol, sign_in.session_token)
        }
        Err(e) => failure_redirect(&state, protocol, &e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logout
// ─────────────────────────────────────────────────────────────────────────────

/// API logout. An empty or malformed body means local logout.
#[tracing::instrument(name = "auth.logout", skip_all, fields(protocol = %protocol))]
pub async fn logout(
    State(state): State<AppState>,
    Extension(protocol): Extension<SsoProtocol>,
    cookies: Cookies,
    body: Bytes,
) -> Result<Json<LogoutResponse>, SsoError> {
    let request: LogoutRequest = serde_json::from_slice(&body).unwrap_or_default();
    let services = get_services(&state)?;
    let token = session_token(&state, &cookies);

    let outcome = services
        .logout
        .logout(
            protocol,
            token.as_deref(),
            request.single_logout,
            request.return_url.as_deref(),
            request.organization_slug.as_deref(),
        )
        .await?;
    clear_session_cookie(&state, &cookies);

    Ok(Json(LogoutResponse {
        success: true,
        logout_url: outcome.logout_url,
    }))
}

/// Browser logout: redirect to the IdP logout URL, or back to the login page.
#[tracing::instrument(name = "auth.logout_redirect", skip_all, fields(protocol = %protocol))]
pub async fn logout_redirect(
    State(state): State<AppState>,
    Extension(protocol): Extension<SsoProtocol>,
    cookies: Cookies,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let services = match get_services(&state) {
        Ok(services) => services,
        Err(e) => return failure_redirect(&state, protocol, &e),
    };
    let token = session_token(&state, &cookies);

    let outcome = services
        .logout
        .logout(
            protocol,
            token.as_deref(),
            query.single_logout.unwrap_or(true),
            query.return_url.as_deref(),
            query.org.as_deref(),
        )
        .await;
    clear_session_cookie(&state, &cookies);

    match outcome {
        Ok(outcome) => {
            Redirect::temporary(outcome.logout_url.as_deref().unwrap_or(&outcome.return_url))
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Logout failed");
            Redirect::temporary(&services.logout.safe_return_url(None)).into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SAML single logout and metadata
// ─────────────────────────────────────────────────────────────────────────────

/// IdP-initiated logout, HTTP-Redirect binding.
#[tracing::instrument(name = "auth.saml.slo", skip_all, fields(binding = "redirect"))]
pub async fn saml_slo_redirect(
    State(state): State<AppState>,
    cookies: Cookies,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<SloParams>,
) -> Response {
    single_logout(&state, &cookies, params, Binding::Redirect, raw_query).await
}

/// IdP-initiated logout, HTTP-POST binding. `organization` may come in the
/// form or in the query string.
#[tracing::instrument(name = "auth.saml.slo", skip_all, fields(binding = "post"))]
pub async fn saml_slo_post(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<SloParams>,
    form: Result<Form<SloParams>, FormRejection>,
) -> Response {
    let mut params = form.map(|Form(f)| f).unwrap_or_default();
    if params.organization.is_none() {
        params.organization = query.organization;
    }
    single_logout(&state, &cookies, params, Binding::Post, None).await
}

async fn single_logout(
    state: &AppState,
    cookies: &Cookies,
    params: SloParams,
    binding: Binding,
    raw_query: Option<String>,
) -> Response {
    let services = match get_services(state) {
        Ok(services) => services,
        Err(e) => return e.into_response(),
    };
    let Some(saml_request) = params.saml_request.filter(|r| !r.is_empty()) else {
        return SsoError::InvalidRequest("SAMLRequest is required".to_string()).into_response();
    };

    let result = services
        .logout
        .single_logout(SloRequest {
            saml_request,
            binding,
            raw_query,
            relay_state: params.relay_state,
            organization: params.organization,
        })
        .await;

    match result {
        Ok(outcome) => {
            clear_session_cookie(state, cookies);
            match outcome.response_url {
                Some(url) => Redirect::temporary(&url).into_response(),
                None => Json(SloResponse {
                    success: true,
                    revoked: outcome.revoked,
                })
                .into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}

/// SP metadata for an organization's SAML provider, as a download.
#[tracing::instrument(name = "auth.saml.metadata", skip(state))]
pub async fn saml_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Response, SsoError> {
    let Some(slug) = query.org.filter(|s| !s.trim().is_empty()) else {
        return Err(SsoError::InvalidRequest("org is required".to_string()));
    };
    let services = get_services(&state)?;
    let (org, provider) = services
        .sso_providers
        .get_provider_for_organization(&slug, SsoProtocol::Saml)
        .await?;

    let name_id_format = match &provider.config {
        ProviderConfig::Saml(idp) => Some(idp.name_id_format.as_str()),
        _ => None,
    };

    tracing::info!(org_id = %org.id, org_slug = %org.slug, "Serving SAML SP metadata");

    Ok((
        [
            (header::CONTENT_TYPE, "application/samlmetadata+xml".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}-saml-metadata.xml\"", org.slug),
            ),
        ],
        state.sso.sp.metadata(name_id_format),
    )
        .into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Session activity
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(name = "auth.session.activity", skip_all)]
pub async fn session_activity(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, SsoError> {
    let services = get_services(&state)?;
    let session = match session_token(&state, &cookies) {
        Some(token) => services.sessions.touch(&token).await?,
        None => None,
    };

    Ok(match session {
        Some(session) => Json(ActivityResponse {
            success: true,
            expires_at: Some(session.expires_at),
        })
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ActivityResponse {
                success: false,
                expires_at: None,
            }),
        )
            .into_response(),
    })
}
