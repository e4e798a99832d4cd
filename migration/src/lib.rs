//! Database migrations for the channelsync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_tenants;
mod m2025_11_10_100000_create_sync_jobs;
mod m2025_11_10_100100_create_job_records;
mod m2025_11_10_100200_create_record_outcomes;
mod m2025_11_10_100300_create_review_items;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_tenants::Migration),
            Box::new(m2025_11_10_100000_create_sync_jobs::Migration),
            Box::new(m2025_11_10_100100_create_job_records::Migration),
            Box::new(m2025_11_10_100200_create_record_outcomes::Migration),
            Box::new(m2025_11_10_100300_create_review_items::Migration),
        ]
    }
}
