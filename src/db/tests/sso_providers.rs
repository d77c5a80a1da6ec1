//! Shared tests for SsoProviderRepo implementations

use uuid::Uuid;

use crate::{
    db::{
        error::DbError,
        repos::{OrganizationRepo, SsoProviderRepo},
        tests::harness::{oidc_provider_input, saml_provider_input},
    },
    models::{
        AttributeMapping, CreateOrganization, ProviderConfig, ProviderStatus, ProviderType,
        SsoProtocol, UpdateSsoProvider,
    },
};

const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----";

/// Test context containing repos needed for provider tests
pub struct ProviderTestContext<'a> {
    pub provider_repo: &'a dyn SsoProviderRepo,
    pub org_repo: &'a dyn OrganizationRepo,
}

impl ProviderTestContext<'_> {
    pub async fn create_test_org(&self, slug: &str) -> Uuid {
        self.org_repo
            .create(CreateOrganization {
                slug: slug.to_string(),
                name: format!("Org {}", slug),
            })
            .await
            .expect("Failed to create test org")
            .id
    }

    async fn count_defaults(&self, org_id: Uuid) -> usize {
        self.provider_repo
            .list_by_org(org_id)
            .await
            .expect("Failed to list providers")
            .iter()
            .filter(|p| p.is_default)
            .count()
    }
}

// ============================================================================
// Shared Test Functions
// ============================================================================

pub async fn test_create_starts_as_draft_with_standard_mapping(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;

    let mut input = saml_provider_input("okta-saml", CERT);
    input.allowed_domains = vec!["ACME.com".to_string()];
    let provider = ctx
        .provider_repo
        .create(org_id, input)
        .await
        .expect("Failed to create provider");

    assert_eq!(provider.status, ProviderStatus::Draft);
    assert!(!provider.is_default);
    assert_eq!(provider.attribute_mapping, AttributeMapping::standard());
    assert_eq!(provider.allowed_domains, vec!["acme.com".to_string()]);

    let fetched = ctx
        .provider_repo
        .get_by_id(provider.id)
        .await
        .unwrap()
        .expect("Provider should exist");
    assert_eq!(fetched.provider_type(), ProviderType::Saml);
    assert_eq!(fetched.config, provider.config);
}

pub async fn test_duplicate_slug_in_org_conflicts(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let other_org = ctx.create_test_org("other").await;

    ctx.provider_repo
        .create(org_id, saml_provider_input("main", CERT))
        .await
        .unwrap();
    let dup = ctx
        .provider_repo
        .create(org_id, saml_provider_input("main", CERT))
        .await;
    assert!(matches!(dup, Err(DbError::Conflict(_))));

    // Slugs are scoped per organization
    ctx.provider_repo
        .create(other_org, saml_provider_input("main", CERT))
        .await
        .expect("Same slug in another org should work");
}

pub async fn test_set_default_leaves_exactly_one(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let a = ctx
        .provider_repo
        .create(org_id, saml_provider_input("a", CERT))
        .await
        .unwrap();
    let b = ctx
        .provider_repo
        .create(org_id, oidc_provider_input("b", "https://idp.example.com"))
        .await
        .unwrap();

    ctx.provider_repo.set_default(org_id, a.id).await.unwrap();
    assert_eq!(ctx.count_defaults(org_id).await, 1);

    let b = ctx.provider_repo.set_default(org_id, b.id).await.unwrap();
    assert!(b.is_default);
    assert_eq!(ctx.count_defaults(org_id).await, 1);

    let a = ctx.provider_repo.get_by_id(a.id).await.unwrap().unwrap();
    assert!(!a.is_default);
}

pub async fn test_set_default_rejects_foreign_provider(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let other_org = ctx.create_test_org("other").await;
    let mine = ctx
        .provider_repo
        .create(org_id, saml_provider_input("mine", CERT))
        .await
        .unwrap();
    let theirs = ctx
        .provider_repo
        .create(other_org, saml_provider_input("theirs", CERT))
        .await
        .unwrap();
    ctx.provider_repo.set_default(org_id, mine.id).await.unwrap();

    let result = ctx.provider_repo.set_default(org_id, theirs.id).await;
    assert!(matches!(result, Err(DbError::NotFound)));

    // The failed call rolled back: the existing default is intact
    let mine = ctx.provider_repo.get_by_id(mine.id).await.unwrap().unwrap();
    assert!(mine.is_default);
}

pub async fn test_find_active_default_filters(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let saml = ctx
        .provider_repo
        .create(org_id, saml_provider_input("saml", CERT))
        .await
        .unwrap();
    let types = SsoProtocol::Saml.provider_types();

    // Draft default is not eligible
    ctx.provider_repo.set_default(org_id, saml.id).await.unwrap();
    assert!(
        ctx.provider_repo
            .find_active_default(org_id, types)
            .await
            .unwrap()
            .is_none()
    );

    ctx.provider_repo
        .set_status(saml.id, ProviderStatus::Active)
        .await
        .unwrap();
    let found = ctx
        .provider_repo
        .find_active_default(org_id, types)
        .await
        .unwrap()
        .expect("Active default should be found");
    assert_eq!(found.id, saml.id);

    // Wrong protocol family
    assert!(
        ctx.provider_repo
            .find_active_default(org_id, SsoProtocol::Oidc.provider_types())
            .await
            .unwrap()
            .is_none()
    );

    ctx.provider_repo
        .set_status(saml.id, ProviderStatus::Inactive)
        .await
        .unwrap();
    assert!(
        ctx.provider_repo
            .find_active_default(org_id, types)
            .await
            .unwrap()
            .is_none()
    );
}

pub async fn test_update_partial_and_type_locked(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let provider = ctx
        .provider_repo
        .create(org_id, saml_provider_input("saml", CERT))
        .await
        .unwrap();

    let updated = ctx
        .provider_repo
        .update(
            provider.id,
            UpdateSsoProvider {
                name: Some("Renamed".to_string()),
                allowed_domains: Some(vec!["Acme.com".to_string()]),
                auto_provision_users: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.allowed_domains, vec!["acme.com".to_string()]);
    assert!(!updated.auto_provision_users);
    assert_eq!(updated.config, provider.config);

    let oidc = oidc_provider_input("x", "https://idp.example.com").config;
    let result = ctx
        .provider_repo
        .update(
            provider.id,
            UpdateSsoProvider {
                config: Some(oidc),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(DbError::Validation(_))));
    assert!(matches!(
        ctx.provider_repo.get_by_id(provider.id).await.unwrap().unwrap().config,
        ProviderConfig::Saml(_)
    ));
}

pub async fn test_soft_delete_hides_and_undefaults(ctx: &ProviderTestContext<'_>) {
    let org_id = ctx.create_test_org("acme-corp").await;
    let provider = ctx
        .provider_repo
        .create(org_id, saml_provider_input("saml", CERT))
        .await
        .unwrap();
    ctx.provider_repo
        .set_default(org_id, provider.id)
        .await
        .unwrap();

    ctx.provider_repo.soft_delete(provider.id).await.unwrap();

    assert!(ctx.provider_repo.get_by_id(provider.id).await.unwrap().is_none());
    assert!(ctx.provider_repo.list_by_org(org_id).await.unwrap().is_empty());
    assert!(matches!(
        ctx.provider_repo.soft_delete(provider.id).await,
        Err(DbError::NotFound)
    ));

    // The slug can be reused after deletion
    ctx.provider_repo
        .create(org_id, saml_provider_input("saml", CERT))
        .await
        .expect("Slug should be free after soft delete");
}

// ============================================================================
// SQLite Tests
// ============================================================================

mod sqlite_tests {
    use crate::db::{
        sqlite::{SqliteOrganizationRepo, SqliteSsoProviderRepo},
        tests::harness::{create_sqlite_pool, run_sqlite_migrations},
    };

    async fn create_repos() -> (SqliteSsoProviderRepo, SqliteOrganizationRepo) {
        let pool = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        (
            SqliteSsoProviderRepo::new(pool.clone()),
            SqliteOrganizationRepo::new(pool),
        )
    }

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let (provider_repo, org_repo) = create_repos().await;
                let ctx = super::ProviderTestContext {
                    provider_repo: &provider_repo,
                    org_repo: &org_repo,
                };
                super::$name(&ctx).await;
            }
        };
    }

    sqlite_test!(test_create_starts_as_draft_with_standard_mapping);
    sqlite_test!(test_duplicate_slug_in_org_conflicts);
    sqlite_test!(test_set_default_leaves_exactly_one);
    sqlite_test!(test_set_default_rejects_foreign_provider);
    sqlite_test!(test_find_active_default_filters);
    sqlite_test!(test_update_partial_and_type_locked);
    sqlite_test!(test_soft_delete_hides_and_undefaults);
}
