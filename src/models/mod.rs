//! # Data Models
//!
//! This module contains all the data models used throughout the channelsync
//! service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod job_record;
pub mod record_outcome;
pub mod review_item;
pub mod sync_job;
pub mod tenant;

pub use job_record::Entity as JobRecord;
pub use record_outcome::Entity as RecordOutcome;
pub use review_item::Entity as ReviewItem;
pub use sync_job::Entity as SyncJob;
pub use tenant::Entity as Tenant;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "channelsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
