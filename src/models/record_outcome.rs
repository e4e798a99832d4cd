//! RecordOutcome entity model
//!
//! Append-only audit trail: one row per record per chunk attempt, with the
//! action taken, before/after field snapshots, and error detail for failures.

use super::sync_job::Entity as SyncJob;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// RecordOutcome entity representing the result of processing one record
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "record_outcomes")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job this outcome belongs to
    pub job_id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Chunk the record was processed in
    pub chunk_index: i32,

    /// Record identifier in the source and target systems
    pub external_id: String,

    /// Action taken (created, updated, skipped, failed, pending_review)
    pub action: String,

    /// Target field values before the write, for audit
    #[sea_orm(column_type = "JsonBinary")]
    pub before: Option<JsonValue>,

    /// Field values after the write, for audit
    #[sea_orm(column_type = "JsonBinary")]
    pub after: Option<JsonValue>,

    /// Error detail when the action is failed
    pub error_detail: Option<String>,

    /// Number of retries the target write needed
    pub retry_count: i32,

    /// Timestamp when the outcome was recorded
    pub recorded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "SyncJob",
        from = "Column::JobId",
        to = "super::sync_job::Column::Id"
    )]
    SyncJob,
}

impl Related<SyncJob> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
