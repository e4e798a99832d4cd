//! Migration to create the job_records table.
//!
//! Job records are the durable record source for a bulk synchronization run:
//! one row per submitted record, ordered by position, written once at
//! submission so resume after a crash re-reads exactly the same set.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobRecords::JobId).uuid().not_null())
                    .col(ColumnDef::new(JobRecords::TenantId).uuid().not_null())
                    .col(ColumnDef::new(JobRecords::Position).integer().not_null())
                    .col(ColumnDef::new(JobRecords::ExternalId).text().not_null())
                    .col(
                        ColumnDef::new(JobRecords::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JobRecords::SourceModifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_job_records_job_id")
                            .from(JobRecords::Table, JobRecords::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Range reads by chunk are (job_id, position) scans
        manager
            .create_index(
                Index::create()
                    .name("idx_job_records_job_position")
                    .table(JobRecords::Table)
                    .col(JobRecords::JobId)
                    .col(JobRecords::Position)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_job_records_job_position")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(JobRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobRecords {
    Table,
    Id,
    JobId,
    TenantId,
    Position,
    ExternalId,
    Payload,
    SourceModifiedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
