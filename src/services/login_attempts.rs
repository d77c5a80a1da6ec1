use std::sync::Arc;

use uuid::Uuid;

use crate::{
    auth::SsoError,
    db::{DbPool, DbResult},
    models::{CreateLoginAttempt, LoginAttemptStatus, SsoLoginAttempt},
};

/// Largest page the login-attempt listing returns.
pub const MAX_ATTEMPT_PAGE: i64 = 500;

/// Request facts recorded with every attempt and session.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What is known about a callback at the moment it finishes. Fields are
/// filled in as the flow progresses so failures are attributed as precisely
/// as possible.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    pub organization_id: Option<Uuid>,
    pub sso_provider_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub provider_user_id: Option<String>,
    pub email: Option<String>,
}

impl AttemptContext {
    /// Turn the context and the flow's outcome into an audit row.
    pub fn into_attempt<T>(
        self,
        outcome: &Result<T, SsoError>,
        request: &RequestContext,
    ) -> CreateLoginAttempt {
        let (status, failure_reason, error_code) = match outcome {
            Ok(_) => (LoginAttemptStatus::Success, None, None),
            Err(e) => (
                e.attempt_status(),
                Some(e.to_string()),
                Some(e.error_code().to_string()),
            ),
        };

        CreateLoginAttempt {
            organization_id: self.organization_id,
            sso_provider_id: self.sso_provider_id,
            user_id: self.user_id,
            provider_user_id: self.provider_user_id,
            email: self.email,
            status,
            failure_reason,
            error_code,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        }
    }
}

/// Append-only login attempt audit trail.
#[derive(Clone)]
pub struct LoginAttemptService {
    db: Arc<DbPool>,
}

impl LoginAttemptService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Write one attempt row. Failures are logged and swallowed so auditing
    /// never changes the outcome of a login.
    pub async fn record(&self, attempt: CreateLoginAttempt) {
        let status = attempt.status;
        match self.db.login_attempts().create(attempt).await {
            Ok(row) => {
                tracing::debug!(attempt_id = %row.id, status = status.as_str(), "Login attempt recorded");
            }
            Err(e) => {
                tracing::error!(error = %e, status = status.as_str(), "Failed to record login attempt");
            }
        }
    }

    /// Most recent attempts for an organization. `limit` is clamped to
    /// `1..=MAX_ATTEMPT_PAGE`.
    pub async fn list_by_org(&self, org_id: Uuid, limit: i64) -> DbResult<Vec<SsoLoginAttempt>> {
        self.db
            .login_attempts()
            .list_by_org(org_id, limit.clamp(1, MAX_ATTEMPT_PAGE))
            .await
    }
}
