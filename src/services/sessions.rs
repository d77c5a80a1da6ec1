use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::RequestContext;
use crate::{
    auth::{SsoError, state::generate_session_token},
    db::{DbPool, DbResult},
    models::{CreateEnterpriseSession, EnterpriseSession, NormalizedAttributes, SsoProvider},
};

/// Enterprise session lifecycle.
#[derive(Clone)]
pub struct SessionService {
    db: Arc<DbPool>,
    duration: Duration,
    activity_interval: Duration,
}

impl SessionService {
    pub fn new(db: Arc<DbPool>, duration: Duration, activity_interval: Duration) -> Self {
        Self {
            db,
            duration,
            activity_interval,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Open a session for a resolved user. The SSO session id is the SAML
    /// SessionIndex when there is one, otherwise the external subject.
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: &SsoProvider,
        attributes: &NormalizedAttributes,
        request: &RequestContext,
    ) -> Result<EnterpriseSession, SsoError> {
        let claims = serde_json::to_value(attributes)
            .map_err(|e| SsoError::Internal(format!("Failed to serialize claims: {}", e)))?;
        let sso_session_id = attributes
            .session_index
            .clone()
            .unwrap_or_else(|| attributes.external_id.clone());

        let session = self
            .db
            .sessions()
            .create(CreateEnterpriseSession {
                user_id,
                organization_id: provider.organization_id,
                sso_provider_id: provider.id,
                session_token: generate_session_token(),
                sso_session_id,
                claims,
                ip_address: request.ip_address.clone(),
                user_agent: request.user_agent.clone(),
                expires_at: Utc::now() + self.duration,
            })
            .await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            provider_id = %provider.id,
            "Enterprise session created"
        );
        Ok(session)
    }

    /// The session for a token if it is unexpired and unrevoked.
    pub async fn validate(&self, token: &str) -> DbResult<Option<EnterpriseSession>> {
        let now = Utc::now();
        Ok(self
            .db
            .sessions()
            .get_by_token(token)
            .await?
            .filter(|s| s.is_valid_at(now)))
    }

    /// Record activity on a valid session. Writes are throttled to one per
    /// activity interval.
    pub async fn touch(&self, token: &str) -> DbResult<Option<EnterpriseSession>> {
        let Some(mut session) = self.validate(token).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if now - session.last_activity_at >= self.activity_interval {
            self.db.sessions().touch(session.id, now).await?;
            session.last_activity_at = now;
        }
        Ok(Some(session))
    }

    /// Delete a session. Identity mappings are kept.
    pub async fn revoke(&self, id: Uuid) -> DbResult<bool> {
        let revoked = self.db.sessions().delete(id).await?;
        if revoked {
            tracing::info!(session_id = %id, "Enterprise session revoked");
        }
        Ok(revoked)
    }

    /// Revoke the session behind a cookie token, returning it when it existed.
    pub async fn revoke_by_token(&self, token: &str) -> DbResult<Option<EnterpriseSession>> {
        let Some(session) = self.db.sessions().get_by_token(token).await? else {
            return Ok(None);
        };
        self.revoke(session.id).await?;
        Ok(Some(session))
    }

    /// Single logout: every session of `provider_id` carrying `sso_session_id`.
    pub async fn revoke_by_sso_session_id(
        &self,
        provider_id: Uuid,
        sso_session_id: &str,
    ) -> DbResult<u64> {
        let count = self
            .db
            .sessions()
            .delete_by_sso_session(provider_id, sso_session_id)
            .await?;
        tracing::info!(provider_id = %provider_id, count, "Revoked sessions for SSO session");
        Ok(count)
    }

    /// Logout everywhere.
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> DbResult<u64> {
        let count = self.db.sessions().delete_by_user(user_id).await?;
        tracing::info!(user_id = %user_id, count, "Revoked all sessions for user");
        Ok(count)
    }

    /// Live sessions of an organization, most recently active first.
    pub async fn list_active(&self, org_id: Uuid) -> DbResult<Vec<EnterpriseSession>> {
        self.db.sessions().list_active(org_id, Utc::now()).await
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Option<EnterpriseSession>> {
        self.db.sessions().get_by_id(id).await
    }
}
