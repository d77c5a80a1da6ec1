use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{db::DbError, models::LoginAttemptStatus};

/// Message shown to users when a failure has no safe description.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Every way an SSO login, callback or logout can fail.
///
/// Variants fall into five classes that drive both the HTTP status and the
/// audit status of the login attempt:
/// - input validation (400, never audited)
/// - configuration (500, audited as `error` once the organization is known)
/// - security validation (audited as `rejected`)
/// - policy (audited as `failed`)
/// - upstream and infrastructure (audited as `error`, retryable)
#[derive(Debug, Error)]
pub enum SsoError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Organization '{0}' not found")]
    OrganizationNotFound(String),

    #[error("No active {protocol} provider configured for organization '{slug}'")]
    ProviderNotConfigured { slug: String, protocol: String },

    #[error("Provider misconfigured: {0}")]
    ProviderMisconfigured(String),

    #[error("State mismatch: {0}")]
    StateMismatch(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Assertion expired or not yet valid: {0}")]
    AssertionExpired(String),

    #[error("Replay detected: {0}")]
    ReplayDetected(String),

    #[error("Issuer mismatch: expected '{expected}', got '{actual}'")]
    IssuerMismatch { expected: String, actual: String },

    #[error("Audience mismatch: {0}")]
    AudienceMismatch(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Email domain '{0}' is not allowed for this organization")]
    DomainNotAllowed(String),

    #[error("Automatic user provisioning is disabled for this provider")]
    AutoProvisioningDisabled,

    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    /// The external identity is linked but its mapping is suspended or unlinked.
    #[error("Identity link is {0}")]
    IdentityLinkInactive(String),

    #[error("Identity provider returned an error: {0}")]
    IdpRejected(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SsoError {
    /// Audit classification of this failure.
    pub fn attempt_status(&self) -> LoginAttemptStatus {
        match self {
            SsoError::StateMismatch(_)
            | SsoError::InvalidSignature(_)
            | SsoError::AssertionExpired(_)
            | SsoError::ReplayDetected(_)
            | SsoError::IssuerMismatch { .. }
            | SsoError::AudienceMismatch(_)
            | SsoError::InvalidResponse(_)
            | SsoError::InvalidToken(_) => LoginAttemptStatus::Rejected,
            SsoError::DomainNotAllowed(_)
            | SsoError::AutoProvisioningDisabled
            | SsoError::MissingAttribute(_)
            | SsoError::IdentityLinkInactive(_)
            | SsoError::IdpRejected(_) => LoginAttemptStatus::Failed,
            SsoError::InvalidRequest(_)
            | SsoError::OrganizationNotFound(_)
            | SsoError::ProviderNotConfigured { .. }
            | SsoError::ProviderMisconfigured(_)
            | SsoError::Upstream(_)
            | SsoError::Timeout(_)
            | SsoError::Database(_)
            | SsoError::Internal(_) => LoginAttemptStatus::Error,
        }
    }

    /// Stable machine-readable code stored with audit records.
    pub fn error_code(&self) -> &'static str {
        match self {
            SsoError::InvalidRequest(_) => "INVALID_REQUEST",
            SsoError::OrganizationNotFound(_) => "ORGANIZATION_NOT_FOUND",
            SsoError::ProviderNotConfigured { .. } => "PROVIDER_NOT_CONFIGURED",
            SsoError::ProviderMisconfigured(_) => "PROVIDER_MISCONFIGURED",
            SsoError::StateMismatch(_) => "STATE_MISMATCH",
            SsoError::InvalidSignature(_) => "SIGNATURE_INVALID",
            SsoError::AssertionExpired(_) => "ASSERTION_EXPIRED",
            SsoError::ReplayDetected(_) => "REPLAY_DETECTED",
            SsoError::IssuerMismatch { .. } => "ISSUER_MISMATCH",
            SsoError::AudienceMismatch(_) => "AUDIENCE_MISMATCH",
            SsoError::InvalidResponse(_) => "INVALID_RESPONSE",
            SsoError::InvalidToken(_) => "INVALID_TOKEN",
            SsoError::DomainNotAllowed(_) => "DOMAIN_NOT_ALLOWED",
            SsoError::AutoProvisioningDisabled => "AUTO_PROVISIONING_DISABLED",
            SsoError::MissingAttribute(_) => "MISSING_ATTRIBUTE",
            SsoError::IdentityLinkInactive(_) => "IDENTITY_LINK_INACTIVE",
            SsoError::IdpRejected(_) => "IDP_ERROR",
            SsoError::Upstream(_) => "UPSTREAM_ERROR",
            SsoError::Timeout(_) => "UPSTREAM_TIMEOUT",
            SsoError::Database(_) => "DATABASE_ERROR",
            SsoError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show in a browser. Security rejections are reported
    /// generically so the response does not help an attacker tune a forgery.
    pub fn public_message(&self) -> String {
        match self {
            SsoError::InvalidRequest(msg) => msg.clone(),
            SsoError::OrganizationNotFound(_) | SsoError::ProviderNotConfigured { .. } => {
                "SSO is not configured for this organization".to_string()
            }
            SsoError::StateMismatch(_) => {
                "Login session expired or is invalid. Please try again.".to_string()
            }
            SsoError::InvalidSignature(_)
            | SsoError::AssertionExpired(_)
            | SsoError::ReplayDetected(_)
            | SsoError::IssuerMismatch { .. }
            | SsoError::AudienceMismatch(_)
            | SsoError::InvalidResponse(_)
            | SsoError::InvalidToken(_) => {
                "The identity provider response could not be verified".to_string()
            }
            SsoError::DomainNotAllowed(_) => {
                "Your email domain is not allowed for this organization".to_string()
            }
            SsoError::AutoProvisioningDisabled => {
                "Your account has not been provisioned. Contact your administrator.".to_string()
            }
            SsoError::MissingAttribute(attr) => {
                format!("The identity provider did not send the required {} attribute", attr)
            }
            SsoError::IdentityLinkInactive(_) => {
                "Your account link with this identity provider is disabled. Contact your administrator."
                    .to_string()
            }
            SsoError::IdpRejected(_) => "The identity provider rejected the login".to_string(),
            SsoError::Upstream(_) | SsoError::Timeout(_) => {
                "The identity provider could not be reached. Please try again.".to_string()
            }
            SsoError::ProviderMisconfigured(_)
            | SsoError::Database(_)
            | SsoError::Internal(_) => UNKNOWN_ERROR.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SsoError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SsoError::StateMismatch(_)
            | SsoError::InvalidSignature(_)
            | SsoError::AssertionExpired(_)
            | SsoError::ReplayDetected(_)
            | SsoError::IssuerMismatch { .. }
            | SsoError::AudienceMismatch(_)
            | SsoError::InvalidResponse(_)
            | SsoError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            SsoError::DomainNotAllowed(_)
            | SsoError::AutoProvisioningDisabled
            | SsoError::MissingAttribute(_)
            | SsoError::IdentityLinkInactive(_)
            | SsoError::IdpRejected(_) => StatusCode::FORBIDDEN,
            SsoError::Upstream(_) | SsoError::Timeout(_) => StatusCode::BAD_GATEWAY,
            SsoError::OrganizationNotFound(_)
            | SsoError::ProviderNotConfigured { .. }
            | SsoError::ProviderMisconfigured(_)
            | SsoError::Database(_)
            | SsoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify a reqwest failure as timeout or generic upstream error.
    pub fn from_http(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SsoError::Timeout(format!("{}: {}", context, err))
        } else {
            SsoError::Upstream(format!("{}: {}", context, err))
        }
    }
}

/// JSON error body for API-style endpoints.
#[derive(Debug, Serialize)]
pub struct SsoErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "SSO request failed");
        } else {
            tracing::warn!(error = %self, code = self.error_code(), "SSO request rejected");
        }

        let body = match &self {
            SsoError::InvalidRequest(msg) => SsoErrorBody {
                error: msg.clone(),
                details: None,
            },
            _ => SsoErrorBody {
                error: "SSO request failed".to_string(),
                details: Some(self.public_message()),
            },
        };
        (status, Json(body)).into_response()
    }
}
