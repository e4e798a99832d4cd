//! # SyncJob Repository
//!
//! This module provides repository operations for the sync_jobs table,
//! encapsulating SeaORM operations with tenant-aware access patterns. The
//! checkpoint update path is the persistence half of the in-order commit
//! guarantee: it only ever moves the cursor forward.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::sync_job::{ActiveModel, Column, Entity, Model};

/// Statuses that keep a job counted against concurrency ceilings.
const ACTIVE_STATUSES: [&str; 3] = ["queued", "running", "paused"];

/// Fields for creating a new sync job
pub struct NewSyncJob {
    pub tenant_id: Uuid,
    pub operation_type: String,
    pub target_slug: String,
    pub total_records: i32,
    pub chunk_size: i32,
    pub field_policies: Option<JsonValue>,
}

/// Per-chunk deltas rolled into the job's outcome counters at commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeDelta {
    pub succeeded: i32,
    pub failed: i32,
    pub skipped: i32,
    pub pending: i32,
}

/// Repository for sync job database operations
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a queued sync job
    pub async fn create(&self, new_job: NewSyncJob) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(new_job.tenant_id),
            operation_type: Set(new_job.operation_type),
            target_slug: Set(new_job.target_slug),
            status: Set("queued".to_string()),
            total_records: Set(new_job.total_records),
            chunk_size: Set(new_job.chunk_size),
            checkpoint: Set(-1),
            succeeded_records: Set(0),
            failed_records: Set(0),
            skipped_records: Set(0),
            pending_records: Set(0),
            field_policies: Set(new_job.field_policies),
            error_summary: Set(None),
            created_at: Set(now),
            started_at: Set(None),
            finished_at: Set(None),
            updated_at: Set(now),
        };

        let result = job
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        tracing::info!(
            tenant_id = %result.tenant_id,
            job_id = %result.id,
            operation_type = %result.operation_type,
            target = %result.target_slug,
            total_records = result.total_records,
            chunk_size = result.chunk_size,
            "Sync job created"
        );

        Ok(result)
    }

    /// Find a sync job by ID, ensuring it belongs to the specified tenant
    pub async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Model>, RepositoryError> {
        let job = Entity::find_by_id(job_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(job)
    }

    /// Find a sync job by ID without a tenant filter (engine internal)
    pub async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let job = Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(job)
    }

    /// List sync jobs for a tenant with optional filtering
    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        status: Option<String>,
        operation_type: Option<String>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        let mut query = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt);

        if let Some(status_filter) = status {
            query = query.filter(Column::Status.eq(status_filter));
        }

        if let Some(operation_filter) = operation_type {
            query = query.filter(Column::OperationType.eq(operation_filter));
        }

        let results = query
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(results)
    }

    /// Count a tenant's jobs still holding or waiting on a concurrency slot
    pub async fn count_active(&self, tenant_id: Uuid) -> Result<u64, RepositoryError> {
        let count = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(count)
    }

    /// Jobs that were queued or running when the process last stopped
    pub async fn list_interrupted(&self) -> Result<Vec<Model>, RepositoryError> {
        let jobs = Entity::find()
            .filter(Column::Status.is_in(["queued", "running"]))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(jobs)
    }

    /// Mark a job running, stamping started_at on the first transition
    pub async fn mark_running(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        let job = self.require(job_id).await?;
        let started_at = job.started_at;

        let mut active: ActiveModel = job.into();
        active.status = Set("running".to_string());
        if started_at.is_none() {
            active.started_at = Set(Some(Utc::now().fixed_offset()));
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(updated)
    }

    /// Advance the checkpoint after a chunk commit and roll up its outcome
    /// counters. The cursor is monotonic: a stale commit (lower or equal
    /// checkpoint) is rejected.
    pub async fn commit_chunk(
        &self,
        job_id: Uuid,
        checkpoint: i32,
        delta: OutcomeDelta,
        error_summary: Option<JsonValue>,
    ) -> Result<Model, RepositoryError> {
        let job = self.require(job_id).await?;

        if checkpoint <= job.checkpoint {
            warn!(
                job_id = %job_id,
                current = job.checkpoint,
                attempted = checkpoint,
                "Rejecting non-monotonic checkpoint advance"
            );
            return Err(RepositoryError::validation_error(format!(
                "checkpoint must advance monotonically (current {}, attempted {})",
                job.checkpoint, checkpoint
            )));
        }

        let succeeded = job.succeeded_records + delta.succeeded;
        let failed = job.failed_records + delta.failed;
        let skipped = job.skipped_records + delta.skipped;
        let pending = job.pending_records + delta.pending;

        let mut active: ActiveModel = job.into();
        active.checkpoint = Set(checkpoint);
        active.succeeded_records = Set(succeeded);
        active.failed_records = Set(failed);
        active.skipped_records = Set(skipped);
        active.pending_records = Set(pending);
        if let Some(summary) = error_summary {
            active.error_summary = Set(Some(summary));
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(updated)
    }

    /// Reduce the pending counter when a review item is resolved
    pub async fn decrement_pending(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        let job = self.require(job_id).await?;
        let pending = (job.pending_records - 1).max(0);

        let mut active: ActiveModel = job.into();
        active.pending_records = Set(pending);
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(updated)
    }

    /// Update the status of a sync job, stamping finished_at for terminal
    /// statuses
    pub async fn update_status(
        &self,
        job_id: Uuid,
        status: &str,
        error_summary: Option<JsonValue>,
    ) -> Result<Model, RepositoryError> {
        let job = self.require(job_id).await?;

        let terminal = matches!(status, "completed" | "failed" | "cancelled");

        let mut active: ActiveModel = job.into();
        active.status = Set(status.to_string());
        if terminal {
            active.finished_at = Set(Some(Utc::now().fixed_offset()));
        }
        if let Some(summary) = error_summary {
            active.error_summary = Set(Some(summary));
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        tracing::info!(job_id = %job_id, status = %status, "Sync job status updated");

        Ok(updated)
    }

    async fn require(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        self.find_by_id(job_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(format!("sync job {}", job_id)))
    }
}
