//! Subscription tier limits.
//!
//! Read-only reference data: each tier maps to the rate, concurrency, and
//! quota limits the rate gate enforces per tenant. Stands in for the external
//! tier configuration source.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Subscription tiers, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Starter,
    Growth,
    Scale,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Starter => "starter",
            Tier::Growth => "growth",
            Tier::Scale => "scale",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownTierError> {
        match value {
            "starter" => Ok(Tier::Starter),
            "growth" => Ok(Tier::Growth),
            "scale" => Ok(Tier::Scale),
            other => Err(UnknownTierError {
                tier: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown subscription tier '{tier}'")]
pub struct UnknownTierError {
    pub tier: String,
}

/// Per-tier rate, concurrency, and quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TierLimit {
    /// Admitted request cost per second per operation class
    pub requests_per_sec: u32,
    /// Concurrent bulk jobs per tenant
    pub max_concurrent_jobs: usize,
    /// Maximum records accepted in a single bulk operation
    pub max_records_per_job: usize,
    /// Admitted request cost per UTC day
    pub daily_request_quota: u64,
    /// Largest chunk size a submission may request
    pub max_chunk_size: usize,
    /// Chunk workers a single job may run in parallel (capped globally)
    pub chunk_concurrency: usize,
}

impl TierLimit {
    /// Look up the limits for a tier.
    pub fn for_tier(tier: Tier) -> TierLimit {
        match tier {
            Tier::Starter => TierLimit {
                requests_per_sec: 5,
                max_concurrent_jobs: 1,
                max_records_per_job: 100,
                daily_request_quota: 10_000,
                max_chunk_size: 25,
                chunk_concurrency: 2,
            },
            Tier::Growth => TierLimit {
                requests_per_sec: 20,
                max_concurrent_jobs: 2,
                max_records_per_job: 5_000,
                daily_request_quota: 100_000,
                max_chunk_size: 100,
                chunk_concurrency: 4,
            },
            Tier::Scale => TierLimit {
                requests_per_sec: 50,
                max_concurrent_jobs: 4,
                max_records_per_job: 50_000,
                daily_request_quota: 1_000_000,
                max_chunk_size: 250,
                chunk_concurrency: 8,
            },
        }
    }

    /// Look up the limits for a tenant's tier column value.
    pub fn for_tier_slug(slug: &str) -> Result<TierLimit, UnknownTierError> {
        Tier::parse(slug).map(Self::for_tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trip() {
        for tier in [Tier::Starter, Tier::Growth, Tier::Scale] {
            assert_eq!(Tier::parse(tier.as_str()).unwrap(), tier);
        }
        assert!(Tier::parse("enterprise").is_err());
    }

    #[test]
    fn test_limits_scale_with_tier() {
        let starter = TierLimit::for_tier(Tier::Starter);
        let scale = TierLimit::for_tier(Tier::Scale);

        assert_eq!(starter.max_records_per_job, 100);
        assert!(scale.max_records_per_job > starter.max_records_per_job);
        assert!(scale.max_concurrent_jobs > starter.max_concurrent_jobs);
        assert!(scale.daily_request_quota > starter.daily_request_quota);
    }
}
