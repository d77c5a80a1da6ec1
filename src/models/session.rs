use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side record of one successful SSO login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub sso_provider_id: Uuid,
    /// Opaque bearer value held in the session cookie. Never serialized.
    #[serde(skip_serializing)]
    pub session_token: String,
    /// IdP session index, or the external id when the IdP sends none.
    pub sso_session_id: String,
    pub claims: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EnterpriseSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct CreateEnterpriseSession {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub sso_provider_id: Uuid,
    pub session_token: String,
    pub sso_session_id: String,
    pub claims: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}
