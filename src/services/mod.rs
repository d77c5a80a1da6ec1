mod login;
mod login_attempts;
mod logout;
mod organizations;
mod provisioning;
mod sessions;
mod sso_providers;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use login::{LoginFlowService, LoginInitiation, OAuthCallbackParams, SamlCallbackForm, SignIn};
pub use login_attempts::{
    AttemptContext, LoginAttemptService, MAX_ATTEMPT_PAGE, RequestContext,
};
pub use logout::{LogoutOutcome, LogoutService, SloOutcome, SloRequest};
pub use organizations::OrganizationService;
pub use provisioning::{ProvisioningService, Resolution};
pub use sessions::SessionService;
pub use sso_providers::SsoProviderService;

use crate::{
    auth::{CookieSigner, SsoError, saml::ServiceProvider},
    config::SsoConfig,
    db::DbPool,
};

/// Immutable inputs shared by every SSO flow: configuration, the outbound
/// HTTP client, the cookie signer and this deployment's SP identity.
#[derive(Clone)]
pub struct SsoEnvironment {
    pub config: Arc<SsoConfig>,
    pub http: reqwest::Client,
    pub signer: Arc<CookieSigner>,
    pub sp: Arc<ServiceProvider>,
}

impl SsoEnvironment {
    pub fn from_config(config: SsoConfig) -> Result<Self, SsoError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SsoError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let signer = CookieSigner::from_secret(config.cookies.secret.as_deref())?;
        let sp = ServiceProvider::from_config(&config)?;

        Ok(Self {
            config: Arc::new(config),
            http,
            signer: Arc::new(signer),
            sp: Arc::new(sp),
        })
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub organizations: OrganizationService,
    pub sso_providers: SsoProviderService,
    pub login: LoginFlowService,
    pub logout: LogoutService,
    pub provisioning: ProvisioningService,
    pub sessions: SessionService,
    pub login_attempts: LoginAttemptService,
}

impl Services {
    pub fn new(db: Arc<DbPool>, env: SsoEnvironment) -> Self {
        let config = env.config.clone();
        let organizations = OrganizationService::new(db.clone());
        let sso_providers = SsoProviderService::new(db.clone());
        let provisioning = ProvisioningService::new(db.clone(), config.default_role.clone());
        let sessions = SessionService::new(
            db.clone(),
            config.session_duration(),
            chrono::Duration::seconds(config.activity_update_interval_secs as i64),
        );
        let login_attempts = LoginAttemptService::new(db.clone());

        let login = LoginFlowService::new(
            db.clone(),
            env.clone(),
            sso_providers.clone(),
            provisioning.clone(),
            sessions.clone(),
            login_attempts.clone(),
        );
        let logout = LogoutService::new(db, env, sso_providers.clone(), sessions.clone());

        Self {
            organizations,
            sso_providers,
            login,
            logout,
            provisioning,
            sessions,
            login_attempts,
        }
    }
}
