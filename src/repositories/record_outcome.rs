//! # RecordOutcome Repository
//!
//! Append-only writes to the per-record audit trail, plus tenant-scoped
//! reads for job detail views.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::record_outcome::{ActiveModel, Column, Entity, Model};

/// Fields for appending one record outcome
pub struct NewRecordOutcome {
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub chunk_index: i32,
    pub external_id: String,
    pub action: String,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub error_detail: Option<String>,
    pub retry_count: i32,
}

/// Repository for record outcome database operations
pub struct RecordOutcomeRepository {
    db: DatabaseConnection,
}

impl RecordOutcomeRepository {
    /// Create a new RecordOutcomeRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append one outcome row. Written once per record per chunk attempt.
    pub async fn append(&self, outcome: NewRecordOutcome) -> Result<Model, RepositoryError> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(outcome.job_id),
            tenant_id: Set(outcome.tenant_id),
            chunk_index: Set(outcome.chunk_index),
            external_id: Set(outcome.external_id),
            action: Set(outcome.action),
            before: Set(outcome.before),
            after: Set(outcome.after),
            error_detail: Set(outcome.error_detail),
            retry_count: Set(outcome.retry_count),
            recorded_at: Set(chrono::Utc::now().fixed_offset()),
        };

        let result = model
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result)
    }

    /// List outcomes for a job, newest chunk first
    pub async fn list_by_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        let outcomes = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::JobId.eq(job_id))
            .order_by_desc(Column::ChunkIndex)
            .order_by_asc(Column::ExternalId)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(outcomes)
    }
}
