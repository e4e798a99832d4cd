//! JobRecord entity model
//!
//! One row per record submitted with a bulk job, ordered by position. This is
//! the durable record source the chunk scheduler reads ranges from, so a
//! resumed job sees exactly the set that was submitted.

use super::sync_job::Entity as SyncJob;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// JobRecord entity representing one submitted record of a bulk job
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_records")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job this record belongs to
    pub job_id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// 0-based position within the job's record set
    pub position: i32,

    /// Record identifier in the source and target systems
    pub external_id: String,

    /// Field name/value payload to synchronize
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Last-modified timestamp reported by the source system
    pub source_modified_at: Option<DateTimeWithTimeZone>,
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
