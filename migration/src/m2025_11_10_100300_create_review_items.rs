//! Migration to create the review_items table.
//!
//! Review items hold field-level conflicts that the configured policy routes
//! to a human. A job with open review items cannot reach a completed status.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReviewItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReviewItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ReviewItems::JobId).uuid().not_null())
                    .col(ColumnDef::new(ReviewItems::TenantId).uuid().not_null())
                    .col(ColumnDef::new(ReviewItems::ExternalId).text().not_null())
                    .col(ColumnDef::new(ReviewItems::Field).text().not_null())
                    .col(
                        ColumnDef::new(ReviewItems::SourceValue)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewItems::TargetValue)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewItems::Status)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(
                        ColumnDef::new(ReviewItems::ChosenValue)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ReviewItems::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_review_items_job_id")
                            .from(ReviewItems::Table, ReviewItems::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_review_items_job_status")
                    .table(ReviewItems::Table)
                    .col(ReviewItems::JobId)
                    .col(ReviewItems::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_review_items_job_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ReviewItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ReviewItems {
    Table,
    Id,
    JobId,
    TenantId,
    ExternalId,
    Field,
    SourceValue,
    TargetValue,
    Status,
    ChosenValue,
    CreatedAt,
    ResolvedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
