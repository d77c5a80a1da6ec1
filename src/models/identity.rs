use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User attributes extracted from a validated IdP response.
///
/// This is the only shape of IdP data that leaves the validation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAttributes {
    /// Stable external identifier (SAML NameID, OIDC `sub`, Azure `oid`).
    pub external_id: String,
    /// Lower-cased email address.
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    /// SAML SessionIndex, used to correlate single logout.
    pub session_index: Option<String>,
}

impl NormalizedAttributes {
    pub fn email_domain(&self) -> &str {
        self.email.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Active,
    Suspended,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Active => "active",
            ProfileStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProfileStatus::Active),
            "suspended" => Ok(ProfileStatus::Suspended),
            _ => Err(format!("Invalid profile status: {}", s)),
        }
    }
}

/// Internal user record, scoped to one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email_verified: bool,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything written when an unknown external identity is auto-provisioned.
#[derive(Debug, Clone)]
pub struct ProvisionUser {
    pub organization_id: Uuid,
    pub sso_provider_id: Uuid,
    pub attributes: NormalizedAttributes,
    /// Snapshot stored on the mapping.
    pub claims: serde_json::Value,
    /// Provider metadata stored on the identity and profile.
    pub metadata: serde_json::Value,
    /// Role slug granted in the organization.
    pub role_slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Suspended,
    Unlinked,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Active => "active",
            LinkStatus::Suspended => "suspended",
            LinkStatus::Unlinked => "unlinked",
        }
    }
}

impl std::str::FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LinkStatus::Active),
            "suspended" => Ok(LinkStatus::Suspended),
            "unlinked" => Ok(LinkStatus::Unlinked),
            _ => Err(format!("Invalid link status: {}", s)),
        }
    }
}

/// Link between one external identity and one internal user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderMapping {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sso_provider_id: Uuid,
    pub provider_user_id: String,
    pub provider_email: String,
    pub provider_username: Option<String>,
    pub claims: serde_json::Value,
    pub link_status: LinkStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub login_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateIdentityMapping {
    pub user_id: Uuid,
    pub sso_provider_id: Uuid,
    pub provider_user_id: String,
    pub provider_email: String,
    pub provider_username: Option<String>,
    pub claims: serde_json::Value,
}
