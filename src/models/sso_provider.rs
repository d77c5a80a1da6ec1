use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::validators::{validate_domains, validate_slug};

/// Placeholder returned instead of stored client secrets.
pub const REDACTED_SECRET: &str = "********";

/// Concrete identity provider product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Saml,
    AzureAdB2c,
    Oidc,
    Okta,
    Auth0,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Saml => "saml",
            ProviderType::AzureAdB2c => "azure_ad_b2c",
            ProviderType::Oidc => "oidc",
            ProviderType::Okta => "okta",
            ProviderType::Auth0 => "auth0",
        }
    }

    /// Route protocol family this provider is reached through.
    pub fn protocol(&self) -> SsoProtocol {
        match self {
            ProviderType::Saml => SsoProtocol::Saml,
            ProviderType::AzureAdB2c => SsoProtocol::Azure,
            ProviderType::Oidc | ProviderType::Okta | ProviderType::Auth0 => SsoProtocol::Oidc,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saml" => Ok(ProviderType::Saml),
            "azure_ad_b2c" => Ok(ProviderType::AzureAdB2c),
            "oidc" => Ok(ProviderType::Oidc),
            "okta" => Ok(ProviderType::Okta),
            "auth0" => Ok(ProviderType::Auth0),
            _ => Err(format!("Invalid provider type: {}", s)),
        }
    }
}

/// Protocol family as it appears in `/api/auth/{protocol}/...` routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SsoProtocol {
    Saml,
    /// Azure AD B2C
    Azure,
    /// Generic OpenID Connect (also Okta and Auth0)
    Oidc,
}

impl SsoProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SsoProtocol::Saml => "saml",
            SsoProtocol::Azure => "azure",
            SsoProtocol::Oidc => "oidc",
        }
    }

    /// Provider types served by this protocol route.
    pub fn provider_types(&self) -> &'static [ProviderType] {
        match self {
            SsoProtocol::Saml => &[ProviderType::Saml],
            SsoProtocol::Azure => &[ProviderType::AzureAdB2c],
            SsoProtocol::Oidc => &[ProviderType::Oidc, ProviderType::Okta, ProviderType::Auth0],
        }
    }

    /// Name of the cookie holding the login state for this protocol.
    pub fn state_cookie_name(&self) -> &'static str {
        match self {
            SsoProtocol::Saml => "saml_relay_state",
            SsoProtocol::Azure => "azure_state",
            SsoProtocol::Oidc => "oidc_state",
        }
    }
}

impl std::fmt::Display for SsoProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SsoProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saml" => Ok(SsoProtocol::Saml),
            "azure" => Ok(SsoProtocol::Azure),
            "oidc" => Ok(SsoProtocol::Oidc),
            _ => Err(format!("Unsupported SSO protocol: {}", s)),
        }
    }
}

/// Provider lifecycle status. Only `active` providers are used for login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Draft,
    Active,
    Inactive,
    Error,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Draft => "draft",
            ProviderStatus::Active => "active",
            ProviderStatus::Inactive => "inactive",
            ProviderStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ProviderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProviderStatus::Draft),
            "active" => Ok(ProviderStatus::Active),
            "inactive" => Ok(ProviderStatus::Inactive),
            "error" => Ok(ProviderStatus::Error),
            _ => Err(format!("Invalid provider status: {}", s)),
        }
    }
}

/// Protocol-specific provider settings, keyed by `provider_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider_type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Saml(SamlProviderConfig),
    AzureAdB2c(AzureB2cProviderConfig),
    Oidc(OidcProviderConfig),
    Okta(OidcProviderConfig),
    Auth0(OidcProviderConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::Saml(_) => ProviderType::Saml,
            ProviderConfig::AzureAdB2c(_) => ProviderType::AzureAdB2c,
            ProviderConfig::Oidc(_) => ProviderType::Oidc,
            ProviderConfig::Okta(_) => ProviderType::Okta,
            ProviderConfig::Auth0(_) => ProviderType::Auth0,
        }
    }

    /// Replace stored secrets with a placeholder for API output.
    pub fn redacted(mut self) -> Self {
        match &mut self {
            ProviderConfig::Saml(_) => {}
            ProviderConfig::AzureAdB2c(c) => c.client_secret = REDACTED_SECRET.to_string(),
            ProviderConfig::Oidc(c) | ProviderConfig::Okta(c) | ProviderConfig::Auth0(c) => {
                c.client_secret = REDACTED_SECRET.to_string()
            }
        }
        self
    }

    /// Carry the stored secret over when an update sends the placeholder or
    /// leaves the secret empty.
    pub fn keep_secret_from(&mut self, existing: &ProviderConfig) {
        let incoming = match self {
            ProviderConfig::Saml(_) => None,
            ProviderConfig::AzureAdB2c(c) => Some(&mut c.client_secret),
            ProviderConfig::Oidc(c) | ProviderConfig::Okta(c) | ProviderConfig::Auth0(c) => {
                Some(&mut c.client_secret)
            }
        };
        let stored = match existing {
            ProviderConfig::Saml(_) => None,
            ProviderConfig::AzureAdB2c(c) => Some(&c.client_secret),
            ProviderConfig::Oidc(c) | ProviderConfig::Okta(c) | ProviderConfig::Auth0(c) => {
                Some(&c.client_secret)
            }
        };
        if let (Some(incoming), Some(stored)) = (incoming, stored)
            && (incoming.is_empty() || incoming == REDACTED_SECRET)
        {
            *incoming = stored.clone();
        }
    }
}

/// SAML 2.0 IdP settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlProviderConfig {
    /// IdP entity ID; assertions must be issued by this entity.
    pub entity_id: String,
    /// IdP single sign-on endpoint (HTTP-Redirect binding).
    pub sso_url: String,
    /// IdP single logout endpoint.
    #[serde(default)]
    pub slo_url: Option<String>,
    /// PEM signing certificate(s). Multiple certificates may be concatenated
    /// for key rollover.
    pub certificate: String,
    #[serde(default = "default_name_id_format")]
    pub name_id_format: String,
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,
    #[serde(default = "default_true")]
    pub want_response_signed: bool,
}

/// Azure AD B2C tenant settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureB2cProviderConfig {
    /// Tenant name, e.g. "contoso" for contoso.onmicrosoft.com.
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// User flow / custom policy.
    #[serde(default = "default_b2c_policy")]
    pub policy_name: String,
    /// Authority override for custom domains. Defaults to
    /// `https://{tenant}.b2clogin.com/{tenant}.onmicrosoft.com/{policy}`.
    #[serde(default)]
    pub authority_url: Option<String>,
}

/// Generic OpenID Connect settings (also used for Okta and Auth0).
///
/// Endpoints not set explicitly are taken from the issuer's discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    pub issuer_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

impl OidcProviderConfig {
    /// True when every endpoint needed for login is configured, so discovery
    /// can be skipped.
    pub fn has_explicit_endpoints(&self) -> bool {
        self.authorization_endpoint.is_some()
            && self.token_endpoint.is_some()
            && self.jwks_uri.is_some()
    }
}

fn default_true() -> bool {
    true
}

fn default_name_id_format() -> String {
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress".to_string()
}

fn default_b2c_policy() -> String {
    "B2C_1_signupsignin1".to_string()
}

fn default_scopes() -> String {
    "openid profile email".to_string()
}

/// Which claim or attribute feeds each profile field.
///
/// Unset fields fall back to protocol defaults during extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl AttributeMapping {
    /// Mapping applied to new providers that don't supply one.
    pub fn standard() -> Self {
        Self {
            email: Some("email".to_string()),
            first_name: Some("given_name".to_string()),
            last_name: Some("family_name".to_string()),
            display_name: Some("name".to_string()),
        }
    }
}

/// A configured identity provider for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoProvider {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: ProviderStatus,
    pub is_default: bool,
    pub config: ProviderConfig,
    pub attribute_mapping: AttributeMapping,
    /// Email domains allowed to sign in. Empty means any domain.
    pub allowed_domains: Vec<String>,
    pub auto_provision_users: bool,
    pub require_email_verification: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SsoProvider {
    pub fn provider_type(&self) -> ProviderType {
        self.config.provider_type()
    }

    /// Check an email address against the domain allow-list.
    ///
    /// Returns the offending domain when rejected. An address without exactly
    /// one `@` never matches a listed domain.
    pub fn check_email_domain(&self, email: &str) -> Result<(), String> {
        let domain = email
            .split_once('@')
            .map(|(_, d)| d.to_ascii_lowercase())
            .unwrap_or_default();
        let well_formed = !domain.is_empty() && !domain.contains('@');

        if self.allowed_domains.is_empty()
            || (well_formed
                && self
                    .allowed_domains
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(&domain)))
        {
            Ok(())
        } else {
            Err(domain)
        }
    }

    pub fn redacted(mut self) -> Self {
        self.config = self.config.redacted();
        self
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSsoProvider {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 64), custom(function = "validate_slug"))]
    pub slug: String,
    #[validate(custom(function = "validate_provider_config"))]
    pub config: ProviderConfig,
    #[serde(default)]
    pub attribute_mapping: Option<AttributeMapping>,
    #[serde(default)]
    #[validate(custom(function = "validate_domains"))]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub auto_provision_users: bool,
    #[serde(default)]
    pub require_email_verification: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSsoProvider {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_provider_config"))]
    pub config: Option<ProviderConfig>,
    pub attribute_mapping: Option<AttributeMapping>,
    #[validate(custom(function = "validate_domains"))]
    pub allowed_domains: Option<Vec<String>>,
    pub auto_provision_users: Option<bool>,
    pub require_email_verification: Option<bool>,
}

fn invalid_config(message: String) -> ValidationError {
    let mut err = ValidationError::new("invalid_provider_config");
    err.message = Some(message.into());
    err
}

fn require_url(field: &str, value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "https" | "http") => Ok(()),
        _ => Err(invalid_config(format!("{} must be an http(s) URL", field))),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(invalid_config(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

/// Structural checks on provider settings. Certificates are only checked for
/// PEM framing here; they are parsed when a login uses them.
pub fn validate_provider_config(config: &ProviderConfig) -> Result<(), ValidationError> {
    match config {
        ProviderConfig::Saml(c) => {
            require_non_empty("entity_id", &c.entity_id)?;
            require_url("sso_url", &c.sso_url)?;
            if let Some(slo) = &c.slo_url {
                require_url("slo_url", slo)?;
            }
            if !c.certificate.contains("-----BEGIN CERTIFICATE-----") {
                return Err(invalid_config(
                    "certificate must be a PEM-encoded X.509 certificate".to_string(),
                ));
            }
            if !c.want_assertions_signed && !c.want_response_signed {
                return Err(invalid_config(
                    "at least one of want_assertions_signed or want_response_signed must be true"
                        .to_string(),
                ));
            }
            Ok(())
        }
        ProviderConfig::AzureAdB2c(c) => {
            if c.tenant_id.is_empty()
                || !c
                    .tenant_id
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
            {
                return Err(invalid_config(
                    "tenant_id must be the B2C tenant name (alphanumeric and hyphens)".to_string(),
                ));
            }
            require_non_empty("client_id", &c.client_id)?;
            require_non_empty("policy_name", &c.policy_name)?;
            if let Some(authority) = &c.authority_url {
                require_url("authority_url", authority)?;
            }
            Ok(())
        }
        ProviderConfig::Oidc(c) | ProviderConfig::Okta(c) | ProviderConfig::Auth0(c) => {
            require_url("issuer_url", &c.issuer_url)?;
            require_non_empty("client_id", &c.client_id)?;
            for (field, value) in [
                ("authorization_endpoint", &c.authorization_endpoint),
                ("token_endpoint", &c.token_endpoint),
                ("jwks_uri", &c.jwks_uri),
                ("end_session_endpoint", &c.end_session_endpoint),
            ] {
                if let Some(v) = value {
                    require_url(field, v)?;
                }
            }
            if !c.scopes.split_whitespace().any(|s| s == "openid") {
                return Err(invalid_config("scopes must include openid".to_string()));
            }
            Ok(())
        }
    }
}
