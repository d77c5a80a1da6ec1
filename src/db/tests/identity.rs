//! Tests for profiles, provisioning and identity mappings

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::{
        DbPool,
        error::DbError,
        tests::harness::{create_test_db, create_test_org, oidc_provider_input},
    },
    models::{CreateIdentityMapping, LinkStatus, NormalizedAttributes, ProvisionUser},
};

struct Fixture {
    db: DbPool,
    org_id: Uuid,
    provider_id: Uuid,
}

async fn setup() -> Fixture {
    let db = create_test_db().await;
    let org_id = create_test_org(&db, "acme-corp").await;
    let provider_id = db
        .sso_providers()
        .create(org_id, oidc_provider_input("oidc", "https://idp.example.com"))
        .await
        .expect("Failed to create provider")
        .id;
    Fixture {
        db,
        org_id,
        provider_id,
    }
}

fn provision_input(f: &Fixture, external_id: &str, email: &str) -> ProvisionUser {
    ProvisionUser {
        organization_id: f.org_id,
        sso_provider_id: f.provider_id,
        attributes: NormalizedAttributes {
            external_id: external_id.to_string(),
            email: email.to_string(),
            first_name: Some("Jane".to_string()),
            last_name: Some("Doe".to_string()),
            display_name: Some("Jane Doe".to_string()),
            session_index: None,
        },
        claims: json!({"sub": external_id, "email": email}),
        metadata: json!({"provider": "oidc"}),
        role_slug: "learner".to_string(),
    }
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn provision_creates_profile_mapping_and_role() {
    let f = setup().await;

    let (profile, mapping) = f
        .db
        .profiles()
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .expect("Provisioning should succeed");

    assert_eq!(profile.organization_id, f.org_id);
    assert_eq!(profile.email, "jane@acme.com");
    assert!(profile.email_verified);
    assert_eq!(mapping.user_id, profile.id);
    assert_eq!(mapping.provider_user_id, "ext-1");
    assert_eq!(mapping.login_count, 1);

    let roles = f.db.profiles().list_roles(profile.id, f.org_id).await.unwrap();
    assert_eq!(roles, vec!["learner".to_string()]);

    let found = f
        .db
        .identity_mappings()
        .find_active(f.provider_id, "ext-1")
        .await
        .unwrap()
        .expect("Mapping should exist");
    assert_eq!(found.id, mapping.id);
}

#[tokio::test]
async fn provision_conflict_writes_nothing() {
    let f = setup().await;
    let profiles = f.db.profiles();

    profiles
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .unwrap();

    let result = profiles
        .provision(provision_input(&f, "ext-1", "other@acme.com"))
        .await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
    assert_eq!(profiles.count_by_org(f.org_id).await.unwrap(), 1);
    assert!(
        profiles
            .find_by_email(f.org_id, "other@acme.com")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn provision_with_unknown_role_fails() {
    let f = setup().await;
    let mut input = provision_input(&f, "ext-1", "jane@acme.com");
    input.role_slug = "superuser".to_string();

    let result = f.db.profiles().provision(input).await;
    assert!(matches!(result, Err(DbError::Validation(_))));
    assert_eq!(f.db.profiles().count_by_org(f.org_id).await.unwrap(), 0);
}

// ============================================================================
// Profile lookup
// ============================================================================

#[tokio::test]
async fn find_by_email_is_case_insensitive_and_org_scoped() {
    let f = setup().await;
    let (profile, _) = f
        .db
        .profiles()
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .unwrap();

    let found = f
        .db
        .profiles()
        .find_by_email(f.org_id, "JANE@Acme.COM")
        .await
        .unwrap()
        .expect("Profile should be found");
    assert_eq!(found.id, profile.id);

    let other_org = create_test_org(&f.db, "other").await;
    assert!(
        f.db.profiles()
            .find_by_email(other_org, "jane@acme.com")
            .await
            .unwrap()
            .is_none()
    );
}

// ============================================================================
// Identity mappings
// ============================================================================

#[tokio::test]
async fn link_existing_profile_and_record_login() {
    let f = setup().await;
    let (profile, _) = f
        .db
        .profiles()
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .unwrap();
    let mappings = f.db.identity_mappings();

    let linked = mappings
        .create(CreateIdentityMapping {
            user_id: profile.id,
            sso_provider_id: f.provider_id,
            provider_user_id: "ext-2".to_string(),
            provider_email: "jane@acme.com".to_string(),
            provider_username: None,
            claims: json!({}),
        })
        .await
        .unwrap();
    assert_eq!(linked.login_count, 1);

    let at = Utc::now() + Duration::minutes(1);
    let updated = mappings
        .record_login(linked.id, "jane.doe@acme.com", &json!({"sub": "ext-2"}), at)
        .await
        .unwrap();
    assert_eq!(updated.login_count, 2);
    assert_eq!(updated.provider_email, "jane.doe@acme.com");
    assert_eq!(updated.claims, json!({"sub": "ext-2"}));
    assert!(updated.last_login_at.is_some());

    assert_eq!(mappings.list_by_user(profile.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn linking_same_identity_twice_conflicts() {
    let f = setup().await;
    let (profile, _) = f
        .db
        .profiles()
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .unwrap();

    let result = f
        .db
        .identity_mappings()
        .create(CreateIdentityMapping {
            user_id: profile.id,
            sso_provider_id: f.provider_id,
            provider_user_id: "ext-1".to_string(),
            provider_email: "jane@acme.com".to_string(),
            provider_username: None,
            claims: json!({}),
        })
        .await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
}

#[tokio::test]
async fn suspended_link_is_found_but_not_active() {
    let f = setup().await;
    let (_, mapping) = f
        .db
        .profiles()
        .provision(provision_input(&f, "ext-1", "jane@acme.com"))
        .await
        .unwrap();
    let mappings = f.db.identity_mappings();

    let suspended = mappings
        .set_link_status(mapping.id, LinkStatus::Suspended)
        .await
        .unwrap();
    assert_eq!(suspended.link_status, LinkStatus::Suspended);

    assert!(
        mappings
            .find_active(f.provider_id, "ext-1")
            .await
            .unwrap()
            .is_none()
    );
    let found = mappings
        .find(f.provider_id, "ext-1")
        .await
        .unwrap()
        .expect("Suspended mapping should still be found");
    assert_eq!(found.id, mapping.id);
    assert_eq!(found.link_status, LinkStatus::Suspended);

    assert!(mappings.find(f.provider_id, "ext-2").await.unwrap().is_none());
    assert!(matches!(
        mappings.set_link_status(Uuid::new_v4(), LinkStatus::Unlinked).await,
        Err(DbError::NotFound)
    ));
}
