//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! which represents bulk synchronization runs. The checkpoint column is the
//! index of the last fully committed chunk (-1 before any commit) and only
//! ever advances.

use super::tenant::Entity as Tenant;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// SyncJob entity representing a bulk synchronization run
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Operation type (inventory-sync, price-sync, bulk-import)
    pub operation_type: String,

    /// Slug of the target system this job writes to
    pub target_slug: String,

    /// Current status (queued, running, paused, completed, failed, cancelled)
    pub status: String,

    /// Total number of records submitted with the job
    pub total_records: i32,

    /// Chunk size used to split the record set
    pub chunk_size: i32,

    /// Index of the last fully committed chunk, -1 before the first commit
    pub checkpoint: i32,

    /// Records written successfully (created or updated)
    pub succeeded_records: i32,

    /// Records with a terminal failure outcome
    pub failed_records: i32,

    /// Records skipped because source and target already matched
    pub skipped_records: i32,

    /// Records held for manual review
    pub pending_records: i32,

    /// Per-field conflict policies chosen at submission
    #[sea_orm(column_type = "JsonBinary")]
    pub field_policies: Option<JsonValue>,

    /// First N record-level error reasons, for callers
    #[sea_orm(column_type = "JsonBinary")]
    pub error_summary: Option<JsonValue>,

    /// Timestamp when the sync job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the job started execution
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the sync job was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Tenant",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
