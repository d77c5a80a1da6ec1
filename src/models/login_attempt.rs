use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome classification of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginAttemptStatus {
    Success,
    /// Policy refused the login (domain, provisioning disabled, IdP error).
    Failed,
    /// Security validation refused the response (state, signature, replay).
    Rejected,
    /// Transient or infrastructure failure; safe to retry from scratch.
    Error,
}

impl LoginAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginAttemptStatus::Success => "success",
            LoginAttemptStatus::Failed => "failed",
            LoginAttemptStatus::Rejected => "rejected",
            LoginAttemptStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for LoginAttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LoginAttemptStatus::Success),
            "failed" => Ok(LoginAttemptStatus::Failed),
            "rejected" => Ok(LoginAttemptStatus::Rejected),
            "error" => Ok(LoginAttemptStatus::Error),
            _ => Err(format!("Invalid login attempt status: {}", s)),
        }
    }
}

/// Append-only audit record of one SSO callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoLoginAttempt {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub sso_provider_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub provider_user_id: Option<String>,
    pub email: Option<String>,
    pub status: LoginAttemptStatus,
    pub failure_reason: Option<String>,
    pub error_code: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateLoginAttempt {
    pub organization_id: Option<Uuid>,
    pub sso_provider_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub provider_user_id: Option<String>,
    pub email: Option<String>,
    pub status: LoginAttemptStatus,
    pub failure_reason: Option<String>,
    pub error_code: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
