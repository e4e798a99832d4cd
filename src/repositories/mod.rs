//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities, providing a clean API for data access
//! with tenant-aware methods.

pub mod job_record;
pub mod record_outcome;
pub mod review_item;
pub mod sync_job;
pub mod tenant;

pub use job_record::{JobRecordRepository, NewJobRecord};
pub use record_outcome::{NewRecordOutcome, RecordOutcomeRepository};
pub use review_item::{NewReviewItem, ReviewItemRepository};
pub use sync_job::{NewSyncJob, OutcomeDelta, SyncJobRepository};
pub use tenant::TenantRepository;
