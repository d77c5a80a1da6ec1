use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{DbPool, DbResult},
    models::{CreateOrganization, Organization},
};

/// Service layer for organization operations
#[derive(Clone)]
pub struct OrganizationService {
    db: Arc<DbPool>,
}

impl OrganizationService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Create a new organization
    pub async fn create(&self, input: CreateOrganization) -> DbResult<Organization> {
        self.db.organizations().create(input).await
    }

    /// Get organization by ID
    pub async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Organization>> {
        self.db.organizations().get_by_id(id).await
    }

    /// Get organization by slug
    pub async fn get_by_slug(&self, slug: &str) -> DbResult<Option<Organization>> {
        self.db.organizations().get_by_slug(slug).await
    }
}
