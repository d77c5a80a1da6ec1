//! Service-level fixture: a migrated in-memory database, one organization
//! (`acme-corp`) with an active default provider, and the full service graph.

use std::sync::Arc;

use openssl::pkey::{PKey, Private};
use uuid::Uuid;

use super::{RequestContext, SamlCallbackForm, Services, SignIn, SsoEnvironment};
use crate::{
    auth::{
        saml::test_support::{ResponseFixture, authn_request_id, idp_config},
        xmldsig::test_support::generate_rsa_cert,
    },
    config::{SsoConfig, SsoCookieConfig},
    db::{
        DbPool,
        tests::harness::{create_test_db, create_test_org, oidc_provider_input},
    },
    models::{
        AttributeMapping, CreateSsoProvider, ProviderConfig, ProviderStatus, SsoLoginAttempt,
        SsoProtocol,
    },
};

pub const BASE_URL: &str = "https://learn.example.com";

pub fn test_sso_config() -> SsoConfig {
    SsoConfig {
        base_url: Some(BASE_URL.to_string()),
        cookies: SsoCookieConfig {
            secret: Some("test-cookie-secret-0123456789abcdef".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// SAML provider input pointing at the fixture IdP.
pub fn saml_provider(certificate: &str) -> CreateSsoProvider {
    CreateSsoProvider {
        name: "Acme Okta".to_string(),
        slug: "acme-okta".to_string(),
        config: ProviderConfig::Saml(idp_config(certificate)),
        attribute_mapping: Some(AttributeMapping::standard()),
        allowed_domains: vec![],
        auto_provision_users: true,
        require_email_verification: false,
    }
}

/// OIDC provider input whose issuer is a mock server.
pub fn oidc_provider(issuer: &str) -> CreateSsoProvider {
    oidc_provider_input("acme-oidc", issuer)
}

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub env: SsoEnvironment,
    pub services: Services,
    pub org_id: Uuid,
    pub provider_id: Uuid,
    /// Key the fixture IdP signs assertions with.
    pub idp_key: PKey<Private>,
}

impl TestApp {
    /// SAML provider trusting a freshly generated IdP certificate.
    pub async fn with_saml() -> Self {
        Self::with_saml_domains(vec![]).await
    }

    pub async fn with_saml_domains(allowed_domains: Vec<String>) -> Self {
        let (key, cert) = generate_rsa_cert();
        let mut input = saml_provider(&cert);
        input.allowed_domains = allowed_domains;
        Self::build(input, key).await
    }

    pub async fn with_provider(input: CreateSsoProvider) -> Self {
        let (key, _) = generate_rsa_cert();
        Self::build(input, key).await
    }

    async fn build(input: CreateSsoProvider, idp_key: PKey<Private>) -> Self {
        let db = Arc::new(create_test_db().await);
        let org_id = create_test_org(&db, "acme-corp").await;
        let env = SsoEnvironment::from_config(test_sso_config()).unwrap();
        let services = Services::new(db.clone(), env.clone());

        let provider = services.sso_providers.create(org_id, input).await.unwrap();
        services
            .sso_providers
            .set_status(provider.id, ProviderStatus::Active)
            .await
            .unwrap();
        services
            .sso_providers
            .set_default(org_id, provider.id)
            .await
            .unwrap();

        Self {
            db,
            env,
            services,
            org_id,
            provider_id: provider.id,
            idp_key,
        }
    }

    pub fn request(&self) -> RequestContext {
        RequestContext {
            ip_address: Some("203.0.113.10".to_string()),
            user_agent: Some("Mozilla/5.0 (test)".to_string()),
        }
    }

    pub async fn attempts(&self) -> Vec<SsoLoginAttempt> {
        self.services
            .login_attempts
            .list_by_org(self.org_id, 100)
            .await
            .unwrap()
    }

    /// Start a SAML login and return the signed state cookie with a valid
    /// callback form for it.
    pub async fn saml_callback(&self) -> (String, SamlCallbackForm) {
        let initiation = self
            .services
            .login
            .initiate("acme-corp", SsoProtocol::Saml)
            .await
            .unwrap();
        let raw = self.env.signer.verify(&initiation.state_cookie_value).unwrap();
        let request_id = authn_request_id(&initiation.authorization_url).unwrap();
        let fixture =
            ResponseFixture::new(&self.env.sp.entity_id, &self.env.sp.acs_url, &request_id);

        let form = SamlCallbackForm {
            saml_response: Some(fixture.encoded(&self.idp_key)),
            relay_state: Some(raw),
        };
        (initiation.state_cookie_value, form)
    }

    /// Complete a full SAML login.
    pub async fn saml_sign_in(&self) -> SignIn {
        let (cookie, form) = self.saml_callback().await;
        self.services
            .login
            .complete_saml(&form, Some(&cookie), &self.request())
            .await
            .unwrap()
    }
}
