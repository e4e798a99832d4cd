//! # Rate Gate
//!
//! Per-tenant admission control for the synchronization engine. Tracks
//! consumption against tier limits with a sliding window per
//! (tenant, operation class) pair, a fixed daily window reset at UTC
//! midnight, and a counting semaphore bounding concurrent bulk jobs.
//!
//! Counters are partitioned per key behind their own locks; there is no
//! global admission lock. Admission decisions are atomic per key.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{NaiveTime, Utc};
use metrics::counter;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::RateGateConfig;
use crate::tiers::TierLimit;

/// Classes of work the gate meters separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Admission of a whole chunk into the worker pool; cost is the record count
    ChunkDispatch,
    /// A single write against a target-system adapter
    TargetWrite,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::ChunkDispatch => "chunk_dispatch",
            OperationClass::TargetWrite => "target_write",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Denied with the earliest time a retry can succeed
    Denied { retry_after: Duration },
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<(Instant, u32)>,
    used: u64,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((admitted_at, cost)) = self.entries.front().copied() {
            if now.duration_since(admitted_at) >= window {
                self.entries.pop_front();
                self.used = self.used.saturating_sub(cost as u64);
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct DailyQuota {
    day: chrono::NaiveDate,
    used: u64,
}

/// Per-tenant admission control against tier-based limits.
pub struct RateGate {
    window: Duration,
    queued_job_ceiling: usize,
    windows: RwLock<HashMap<(Uuid, OperationClass), Arc<Mutex<WindowState>>>>,
    daily: RwLock<HashMap<Uuid, Arc<Mutex<DailyQuota>>>>,
    job_permits: RwLock<HashMap<Uuid, Arc<Semaphore>>>,
}

impl RateGate {
    pub fn new(config: &RateGateConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_seconds),
            queued_job_ceiling: config.queued_job_ceiling,
            windows: RwLock::new(HashMap::new()),
            daily: RwLock::new(HashMap::new()),
            job_permits: RwLock::new(HashMap::new()),
        }
    }

    /// Hard ceiling on jobs a tenant may have queued behind its concurrency cap.
    pub fn queued_job_ceiling(&self) -> usize {
        self.queued_job_ceiling
    }

    /// Check whether `cost` units of `class` work may proceed for the tenant.
    ///
    /// Consumes window and daily budget only when the answer is `Allowed`.
    pub fn admit(
        &self,
        tenant_id: Uuid,
        class: OperationClass,
        cost: u32,
        limits: &TierLimit,
    ) -> Admission {
        // Daily fixed window first: nothing is consumed on denial.
        let daily = self.daily_entry(tenant_id);
        let mut daily_guard = daily.lock().unwrap_or_else(|poison| poison.into_inner());

        let today = Utc::now().date_naive();
        if daily_guard.day != today {
            daily_guard.day = today;
            daily_guard.used = 0;
        }

        if daily_guard.used + cost as u64 > limits.daily_request_quota {
            counter!("rate_gate_denials_total", "class" => class.as_str(), "reason" => "daily_quota")
                .increment(1);
            return Admission::Denied {
                retry_after: until_utc_midnight(),
            };
        }

        // Sliding window per (tenant, operation class).
        let window_entry = self.window_entry(tenant_id, class);
        let mut window_guard = window_entry
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let now = Instant::now();
        window_guard.prune(now, self.window);

        let capacity = limits.requests_per_sec as u64 * self.window.as_secs().max(1);
        if window_guard.used + cost as u64 > capacity {
            let retry_after = window_guard
                .entries
                .front()
                .map(|(oldest, _)| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);

            counter!("rate_gate_denials_total", "class" => class.as_str(), "reason" => "window")
                .increment(1);
            return Admission::Denied { retry_after };
        }

        window_guard.entries.push_back((now, cost));
        window_guard.used += cost as u64;
        daily_guard.used += cost as u64;

        counter!("rate_gate_admissions_total", "class" => class.as_str()).increment(1);
        Admission::Allowed
    }

    /// Counting semaphore bounding the tenant's concurrent bulk jobs.
    ///
    /// Jobs beyond the cap queue on the semaphore rather than failing; the
    /// queued-job ceiling is enforced separately at submission.
    pub fn job_permits(&self, tenant_id: Uuid, limits: &TierLimit) -> Arc<Semaphore> {
        if let Some(existing) = self
            .job_permits
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(&tenant_id)
        {
            return existing.clone();
        }

        let mut permits = self
            .job_permits
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        permits
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Semaphore::new(limits.max_concurrent_jobs)))
            .clone()
    }

    fn window_entry(
        &self,
        tenant_id: Uuid,
        class: OperationClass,
    ) -> Arc<Mutex<WindowState>> {
        let key = (tenant_id, class);
        if let Some(existing) = self
            .windows
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(&key)
        {
            return existing.clone();
        }

        let mut windows = self
            .windows
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        windows
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(WindowState::default())))
            .clone()
    }

    fn daily_entry(&self, tenant_id: Uuid) -> Arc<Mutex<DailyQuota>> {
        if let Some(existing) = self
            .daily
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(&tenant_id)
        {
            return existing.clone();
        }

        let mut daily = self
            .daily
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        daily
            .entry(tenant_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(DailyQuota {
                    day: Utc::now().date_naive(),
                    used: 0,
                }))
            })
            .clone()
    }
}

/// Duration until the next UTC midnight, the daily quota reset boundary.
fn until_utc_midnight() -> Duration {
    let now = Utc::now();
    let midnight = now
        .date_naive()
        .succ_opt()
        .unwrap_or(now.date_naive())
        .and_time(NaiveTime::MIN)
        .and_utc();

    (midnight - now).to_std().unwrap_or(Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::{Tier, TierLimit};

    fn gate() -> RateGate {
        RateGate::new(&RateGateConfig {
            window_seconds: 1,
            queued_job_ceiling: 8,
        })
    }

    #[test]
    fn test_admits_within_window_capacity() {
        let gate = gate();
        let tenant = Uuid::new_v4();
        let limits = TierLimit::for_tier(Tier::Starter); // 5 rps

        for _ in 0..5 {
            assert_eq!(
                gate.admit(tenant, OperationClass::ChunkDispatch, 1, &limits),
                Admission::Allowed
            );
        }

        match gate.admit(tenant, OperationClass::ChunkDispatch, 1, &limits) {
            Admission::Denied { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
            }
            Admission::Allowed => panic!("expected denial past window capacity"),
        }
    }

    #[test]
    fn test_classes_are_metered_independently() {
        let gate = gate();
        let tenant = Uuid::new_v4();
        let limits = TierLimit::for_tier(Tier::Starter);

        for _ in 0..5 {
            assert_eq!(
                gate.admit(tenant, OperationClass::ChunkDispatch, 1, &limits),
                Admission::Allowed
            );
        }

        // A different class still has budget.
        assert_eq!(
            gate.admit(tenant, OperationClass::TargetWrite, 1, &limits),
            Admission::Allowed
        );
    }

    #[test]
    fn test_tenants_are_isolated() {
        let gate = gate();
        let limits = TierLimit::for_tier(Tier::Starter);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        for _ in 0..5 {
            assert_eq!(
                gate.admit(first, OperationClass::ChunkDispatch, 1, &limits),
                Admission::Allowed
            );
        }

        assert_eq!(
            gate.admit(second, OperationClass::ChunkDispatch, 1, &limits),
            Admission::Allowed
        );
    }

    #[test]
    fn test_daily_quota_denial_points_at_midnight() {
        let gate = gate();
        let tenant = Uuid::new_v4();
        let limits = TierLimit {
            requests_per_sec: 1000,
            max_concurrent_jobs: 1,
            max_records_per_job: 100,
            daily_request_quota: 3,
            max_chunk_size: 25,
            chunk_concurrency: 2,
        };

        for _ in 0..3 {
            assert_eq!(
                gate.admit(tenant, OperationClass::TargetWrite, 1, &limits),
                Admission::Allowed
            );
        }

        match gate.admit(tenant, OperationClass::TargetWrite, 1, &limits) {
            Admission::Denied { retry_after } => {
                assert!(retry_after <= Duration::from_secs(24 * 3600));
            }
            Admission::Allowed => panic!("expected daily quota denial"),
        }
    }

    #[test]
    fn test_denied_cost_is_not_consumed() {
        let gate = gate();
        let tenant = Uuid::new_v4();
        let limits = TierLimit::for_tier(Tier::Starter); // 5 rps

        // Oversized cost is denied without consuming budget.
        assert!(matches!(
            gate.admit(tenant, OperationClass::ChunkDispatch, 10, &limits),
            Admission::Denied { .. }
        ));

        for _ in 0..5 {
            assert_eq!(
                gate.admit(tenant, OperationClass::ChunkDispatch, 1, &limits),
                Admission::Allowed
            );
        }
    }

    #[tokio::test]
    async fn test_job_permits_bound_concurrency() {
        let gate = gate();
        let tenant = Uuid::new_v4();
        let limits = TierLimit::for_tier(Tier::Starter); // 1 concurrent job

        let permits = gate.job_permits(tenant, &limits);
        let held = permits.clone().try_acquire_owned().unwrap();
        assert!(permits.clone().try_acquire_owned().is_err());

        drop(held);
        assert!(permits.try_acquire_owned().is_ok());
    }
}
