//! # ReviewItem Repository
//!
//! Storage for manual-review conflicts. Open items keep their job
//! non-terminal; resolution closes the item with the reviewer's chosen
//! value.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::review_item::{ActiveModel, Column, Entity, Model};

/// Fields for surfacing one conflict for review
pub struct NewReviewItem {
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub field: String,
    pub source_value: JsonValue,
    pub target_value: Option<JsonValue>,
}

/// Repository for review item database operations
pub struct ReviewItemRepository {
    db: DatabaseConnection,
}

impl ReviewItemRepository {
    /// Create a new ReviewItemRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Surface a conflict as an open review item
    pub async fn create(&self, item: NewReviewItem) -> Result<Model, RepositoryError> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(item.job_id),
            tenant_id: Set(item.tenant_id),
            external_id: Set(item.external_id),
            field: Set(item.field),
            source_value: Set(item.source_value),
            target_value: Set(item.target_value),
            status: Set("open".to_string()),
            chosen_value: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            resolved_at: Set(None),
        };

        let result = model
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        tracing::info!(
            tenant_id = %result.tenant_id,
            job_id = %result.job_id,
            external_id = %result.external_id,
            field = %result.field,
            "Conflict held for manual review"
        );

        Ok(result)
    }

    /// Find a review item by ID, ensuring it belongs to the specified tenant
    pub async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<Model>, RepositoryError> {
        let item = Entity::find_by_id(item_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(item)
    }

    /// List review items for a job, open items first
    pub async fn list_by_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        status: Option<String>,
    ) -> Result<Vec<Model>, RepositoryError> {
        let mut query = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::Status)
            .order_by_asc(Column::CreatedAt);

        if let Some(status_filter) = status {
            query = query.filter(Column::Status.eq(status_filter));
        }

        let items = query
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(items)
    }

    /// Number of open review items blocking a job's completion
    pub async fn count_open(&self, job_id: Uuid) -> Result<u64, RepositoryError> {
        let count = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.eq("open"))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(count)
    }

    /// Open items still held against one record. A record stays pending
    /// until every one of its fields is reviewed.
    pub async fn count_open_for_record(
        &self,
        job_id: Uuid,
        external_id: &str,
    ) -> Result<u64, RepositoryError> {
        let count = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::ExternalId.eq(external_id))
            .filter(Column::Status.eq("open"))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(count)
    }

    /// Close an open review item with the reviewer's chosen value
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        chosen_value: JsonValue,
    ) -> Result<Model, RepositoryError> {
        let item = self
            .find_by_tenant(tenant_id, item_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(format!("review item {}", item_id)))?;

        if item.status != "open" {
            return Err(RepositoryError::validation_error(format!(
                "review item {} is already {}",
                item_id, item.status
            )));
        }

        let mut active: ActiveModel = item.into();
        active.status = Set("resolved".to_string());
        active.chosen_value = Set(Some(chosen_value));
        active.resolved_at = Set(Some(Utc::now().fixed_offset()));

        let updated = active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        tracing::info!(
            tenant_id = %updated.tenant_id,
            job_id = %updated.job_id,
            item_id = %updated.id,
            field = %updated.field,
            "Review item resolved"
        );

        Ok(updated)
    }
}
