//! ReviewItem entity model
//!
//! Field-level conflicts routed to a human by the manual policy. A job with
//! open review items cannot reach a completed status.

use super::sync_job::Entity as SyncJob;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// ReviewItem entity representing an unresolved field-level conflict
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "review_items")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job the conflict surfaced in
    pub job_id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Record identifier in the source and target systems
    pub external_id: String,

    /// Field the source and target disagree on
    pub field: String,

    /// Value reported by the source system
    #[sea_orm(column_type = "JsonBinary")]
    pub source_value: JsonValue,

    /// Value currently held by the target system
    #[sea_orm(column_type = "JsonBinary")]
    pub target_value: Option<JsonValue>,

    /// Review status (open, resolved)
    pub status: String,

    /// Value chosen by the reviewer
    #[sea_orm(column_type = "JsonBinary")]
    pub chosen_value: Option<JsonValue>,

    /// Timestamp when the conflict was surfaced
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the reviewer resolved the item
    pub resolved_at: Option<DateTimeWithTimeZone>,
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
