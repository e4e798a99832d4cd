//! # JobRecord Repository
//!
//! Write-once storage for a job's submitted record set and range reads for
//! the chunk scheduler.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::job_record::{ActiveModel, Column, Entity, Model};

/// Batched inserts keep single statements bounded for large jobs.
const INSERT_BATCH_SIZE: usize = 500;

/// Fields for one record in a submission
pub struct NewJobRecord {
    pub position: i32,
    pub external_id: String,
    pub payload: JsonValue,
    pub source_modified_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Repository for job record database operations
pub struct JobRecordRepository {
    db: DatabaseConnection,
}

impl JobRecordRepository {
    /// Create a new JobRecordRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a job's full record set at submission
    pub async fn insert_batch(
        &self,
        job_id: Uuid,
        tenant_id: Uuid,
        records: Vec<NewJobRecord>,
    ) -> Result<(), RepositoryError> {
        for batch in records.chunks(INSERT_BATCH_SIZE) {
            let models: Vec<ActiveModel> = batch
                .iter()
                .map(|record| ActiveModel {
                    id: Set(Uuid::new_v4()),
                    job_id: Set(job_id),
                    tenant_id: Set(tenant_id),
                    position: Set(record.position),
                    external_id: Set(record.external_id.clone()),
                    payload: Set(record.payload.clone()),
                    source_modified_at: Set(record
                        .source_modified_at
                        .map(|ts| ts.fixed_offset())),
                })
                .collect();

            Entity::insert_many(models)
                .exec(&self.db)
                .await
                .map_err(RepositoryError::database_error)?;
        }

        Ok(())
    }

    /// Read one chunk's worth of records, ordered by position
    pub async fn fetch_range(
        &self,
        job_id: Uuid,
        offset: usize,
        len: usize,
    ) -> Result<Vec<Model>, RepositoryError> {
        let records = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Position.gte(offset as i32))
            .filter(Column::Position.lt((offset + len) as i32))
            .order_by_asc(Column::Position)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(records)
    }
}
