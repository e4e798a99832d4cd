//! # Tenant Repository
//!
//! Lookup of tenant rows, primarily to resolve the subscription tier at job
//! submission and chunk admission.

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::tenant::{ActiveModel, Entity, Model};

/// Repository for tenant database operations
pub struct TenantRepository {
    db: DatabaseConnection,
}

impl TenantRepository {
    /// Create a new TenantRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Find a tenant by ID
    pub async fn find(&self, tenant_id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let tenant = Entity::find_by_id(tenant_id)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(tenant)
    }

    /// Create a tenant with the given tier
    pub async fn create(
        &self,
        tenant_id: Uuid,
        name: Option<String>,
        tier: &str,
    ) -> Result<Model, RepositoryError> {
        let tenant = ActiveModel {
            id: Set(tenant_id),
            name: Set(name),
            tier: Set(tier.to_string()),
            created_at: Set(chrono::Utc::now().fixed_offset()),
        };

        let result = tenant
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result)
    }
}
