use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Environment variable consulted for the public base URL when `sso.base_url`
/// is not set.
pub const SITE_URL_ENV: &str = "NEXT_PUBLIC_SITE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// SSO flow configuration.
///
/// Per-organization IdP material (certificates, client secrets) lives on the
/// provider rows in the database. This section only holds deployment-wide
/// settings: the public URL the IdPs call back to, timeouts and cookie policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoConfig {
    /// Public base URL of this deployment, used to build callback URLs.
    /// Must exactly match what is registered with each IdP.
    #[serde(default)]
    pub base_url: Option<String>,

    /// SAML Service Provider entity ID.
    /// Defaults to `{base_url}/api/auth/saml/metadata`.
    #[serde(default)]
    pub sp_entity_id: Option<String>,

    /// Where to send the browser after a successful login.
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,

    /// Login page used for error and logout redirects.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Role slug granted to auto-provisioned users.
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Allowed clock drift when checking assertion and token validity windows.
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// How long an issued AuthnRequest ID stays valid for `InResponseTo`.
    #[serde(default = "default_request_id_ttl_secs")]
    pub request_id_ttl_secs: u64,

    /// Enterprise session lifetime.
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u64,

    /// Minimum interval between `last_activity_at` writes for one session.
    #[serde(default = "default_activity_update_interval_secs")]
    pub activity_update_interval_secs: u64,

    /// Total timeout for calls to identity providers (discovery, token, JWKS).
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Connect timeout for calls to identity providers.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Accept RSA-SHA1 XML signatures. Some legacy ADFS deployments still
    /// sign with SHA-1.
    #[serde(default)]
    pub allow_sha1_signatures: bool,

    /// Cookie settings for state and session cookies.
    #[serde(default)]
    pub cookies: SsoCookieConfig,

    /// SP signing key for AuthnRequests, LogoutRequests and metadata.
    #[serde(default)]
    pub signing: Option<SpSigningConfig>,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            sp_entity_id: None,
            post_login_redirect: default_post_login_redirect(),
            login_path: default_login_path(),
            default_role: default_role(),
            clock_skew_secs: default_clock_skew_secs(),
            request_id_ttl_secs: default_request_id_ttl_secs(),
            session_duration_secs: default_session_duration_secs(),
            activity_update_interval_secs: default_activity_update_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            allow_sha1_signatures: false,
            cookies: SsoCookieConfig::default(),
            signing: None,
        }
    }
}

impl SsoConfig {
    /// Fill in the base URL from the environment when it is not configured,
    /// then check the result.
    pub(super) fn resolve_and_validate(&mut self) -> Result<(), ConfigError> {
        if self.base_url.is_none() {
            self.base_url = std::env::var(SITE_URL_ENV).ok().filter(|v| !v.is_empty());
        }

        let base = self.base_url();
        let parsed = url::Url::parse(base).map_err(|e| {
            ConfigError::Validation(format!("sso.base_url '{}' is not a valid URL: {}", base, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "sso.base_url must use http or https".into(),
            ));
        }

        for (name, path) in [
            ("sso.post_login_redirect", &self.post_login_redirect),
            ("sso.login_path", &self.login_path),
        ] {
            if !path.starts_with('/') || path.starts_with("//") {
                return Err(ConfigError::Validation(format!(
                    "{} must be a local path starting with '/'",
                    name
                )));
            }
        }

        if self.default_role.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sso.default_role cannot be empty".into(),
            ));
        }
        if self.session_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "sso.session_duration_secs must be greater than zero".into(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sso.http_timeout_secs must be greater than zero".into(),
            ));
        }

        self.cookies.validate()?;
        if let Some(signing) = &self.signing {
            signing.validate()?;
        }
        Ok(())
    }

    /// Public base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// Redirect URI registered with the IdP for the given route protocol.
    pub fn callback_url(&self, protocol: &str) -> String {
        format!("{}/api/auth/{}/callback", self.base_url(), protocol)
    }

    /// SAML Assertion Consumer Service URL.
    pub fn acs_url(&self) -> String {
        self.callback_url("saml")
    }

    /// SAML single logout endpoint advertised in SP metadata.
    pub fn slo_url(&self) -> String {
        format!("{}/api/auth/saml/slo", self.base_url())
    }

    pub fn sp_entity_id(&self) -> String {
        self.sp_entity_id
            .clone()
            .unwrap_or_else(|| format!("{}/api/auth/saml/metadata", self.base_url()))
    }

    /// Whether cookies get the `Secure` attribute. Explicit config wins;
    /// otherwise cookies are secure whenever the public URL is https.
    pub fn secure_cookies(&self) -> bool {
        self.cookies
            .secure
            .unwrap_or_else(|| self.base_url().starts_with("https://"))
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_secs as i64)
    }

    pub fn request_id_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.request_id_ttl_secs as i64)
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_duration_secs as i64)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_post_login_redirect() -> String {
    "/dashboard".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_role() -> String {
    "learner".to_string()
}

fn default_clock_skew_secs() -> u64 {
    300
}

fn default_request_id_ttl_secs() -> u64 {
    8 * 60 * 60
}

fn default_session_duration_secs() -> u64 {
    8 * 60 * 60
}

fn default_activity_update_interval_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Cookie policy for state and session cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoCookieConfig {
    /// Force the `Secure` attribute on or off.
    #[serde(default)]
    pub secure: Option<bool>,

    /// Name of the enterprise session cookie.
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Max-age of the login state cookies. This is also the effective timeout
    /// for an abandoned login.
    #[serde(default = "default_state_max_age_secs")]
    pub state_max_age_secs: u64,

    /// HMAC key for signing state cookies. A random key is generated at
    /// startup when unset, which invalidates in-flight logins on restart and
    /// breaks multi-instance deployments.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for SsoCookieConfig {
    fn default() -> Self {
        Self {
            secure: None,
            session_cookie_name: default_session_cookie_name(),
            state_max_age_secs: default_state_max_age_secs(),
            secret: None,
        }
    }
}

impl SsoCookieConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_cookie_name.is_empty()
            || !self
                .session_cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Validation(
                "sso.cookies.session_cookie_name must be non-empty and contain only \
                 alphanumerics, '_' or '-'"
                    .into(),
            ));
        }
        if self.state_max_age_secs == 0 {
            return Err(ConfigError::Validation(
                "sso.cookies.state_max_age_secs must be greater than zero".into(),
            ));
        }
        if let Some(secret) = &self.secret
            && secret.len() < 32
        {
            return Err(ConfigError::Validation(
                "sso.cookies.secret must be at least 32 characters".into(),
            ));
        }
        Ok(())
    }
}

fn default_session_cookie_name() -> String {
    "sso_session".to_string()
}

fn default_state_max_age_secs() -> u64 {
    600
}

/// SP key pair used to sign outgoing SAML messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpSigningConfig {
    /// PEM-encoded private key (PKCS#8 or PKCS#1).
    pub private_key_pem: String,

    /// PEM-encoded certificate published in SP metadata.
    pub certificate_pem: String,
}

impl SpSigningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.private_key_pem.contains("PRIVATE KEY") {
            return Err(ConfigError::Validation(
                "sso.signing.private_key_pem must be a PEM private key".into(),
            ));
        }
        if !self.certificate_pem.contains("BEGIN CERTIFICATE") {
            return Err(ConfigError::Validation(
                "sso.signing.certificate_pem must be a PEM certificate".into(),
            ));
        }
        Ok(())
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Static bearer token for the admin API. Admin routes are not mounted
    /// when unset.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl AdminConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(token) = &self.api_token
            && token.len() < 16
        {
            return Err(ConfigError::Validation(
                "admin.api_token must be at least 16 characters".into(),
            ));
        }
        Ok(())
    }
}
