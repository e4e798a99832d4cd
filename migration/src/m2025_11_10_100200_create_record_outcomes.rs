//! Migration to create the record_outcomes table.
//!
//! Record outcomes are the append-only audit trail of a synchronization run:
//! one row per record per chunk attempt, with the action taken, before/after
//! field snapshots, and error detail for failures.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecordOutcomes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecordOutcomes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RecordOutcomes::JobId).uuid().not_null())
                    .col(ColumnDef::new(RecordOutcomes::TenantId).uuid().not_null())
                    .col(
                        ColumnDef::new(RecordOutcomes::ChunkIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecordOutcomes::ExternalId).text().not_null())
                    .col(ColumnDef::new(RecordOutcomes::Action).text().not_null())
                    .col(ColumnDef::new(RecordOutcomes::Before).json_binary().null())
                    .col(ColumnDef::new(RecordOutcomes::After).json_binary().null())
                    .col(ColumnDef::new(RecordOutcomes::ErrorDetail).text().null())
                    .col(
                        ColumnDef::new(RecordOutcomes::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RecordOutcomes::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_record_outcomes_job_id")
                            .from(RecordOutcomes::Table, RecordOutcomes::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_record_outcomes_job_chunk")
                    .table(RecordOutcomes::Table)
                    .col(RecordOutcomes::JobId)
                    .col(RecordOutcomes::ChunkIndex)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_record_outcomes_tenant_recorded")
                    .table(RecordOutcomes::Table)
                    .col(RecordOutcomes::TenantId)
                    .col(RecordOutcomes::RecordedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_record_outcomes_job_chunk")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_record_outcomes_tenant_recorded")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(RecordOutcomes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RecordOutcomes {
    Table,
    Id,
    JobId,
    TenantId,
    ChunkIndex,
    ExternalId,
    Action,
    Before,
    After,
    ErrorDetail,
    RetryCount,
    RecordedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
