//! # Sync executor
//!
//! Wraps each record write to a target-system adapter with a bounded-attempt
//! retry policy: exponential backoff with jitter for transient errors only.
//! Permanent failures are returned immediately. Each attempt passes through
//! the rate gate's target-write class before reaching the adapter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use rand::Rng;
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{AdapterError, TargetAdapter};
use crate::config::RetryPolicyConfig;
use crate::engine::rate_gate::{Admission, OperationClass, RateGate};
use crate::tiers::TierLimit;

/// Bounded-attempt retry policy applied uniformly to target writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped, with ± jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return raw;
        }

        let jitter = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
        raw.mul_f64((1.0 + jitter).max(0.0))
    }
}

/// A successful application, with the retries it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub retries: u32,
}

/// Errors the executor can surface for a record write.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The adapter failed terminally (or retries were exhausted)
    #[error("{error}")]
    Adapter { error: AdapterError, retries: u32 },
    /// The job was cancelled while waiting to write
    #[error("write cancelled")]
    Cancelled,
}

/// Apply the resolved writes for one record to a target adapter.
///
/// Transient and rate-limited errors are retried up to the policy's attempt
/// cap; a rate-limit hint from the target overrides the computed backoff.
/// Validation rejections and auth failures return immediately.
pub async fn apply_record(
    adapter: &Arc<dyn TargetAdapter>,
    gate: &RateGate,
    limits: &TierLimit,
    policy: &RetryPolicy,
    tenant_id: Uuid,
    external_id: &str,
    writes: &BTreeMap<String, JsonValue>,
    cancel: &CancellationToken,
) -> Result<Applied, ExecuteError> {
    let mut attempt: u32 = 0;

    loop {
        admit_write(gate, limits, tenant_id, cancel).await?;

        let started = std::time::Instant::now();
        let result = adapter.write(tenant_id, external_id, writes).await;
        histogram!("sync_adapter_write_duration_ms", "target" => adapter.slug())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(()) => {
                counter!("sync_adapter_writes_total", "target" => adapter.slug(), "outcome" => "ok")
                    .increment(1);
                return Ok(Applied { retries: attempt });
            }
            Err(error) => {
                attempt += 1;

                if !error.is_retryable() || attempt >= policy.max_attempts {
                    counter!(
                        "sync_adapter_writes_total",
                        "target" => adapter.slug(),
                        "outcome" => "failed"
                    )
                    .increment(1);
                    return Err(ExecuteError::Adapter {
                        error,
                        retries: attempt - 1,
                    });
                }

                let delay = match &error {
                    AdapterError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => Duration::from_secs(*secs),
                    _ => policy.backoff(attempt),
                };

                warn!(
                    tenant_id = %tenant_id,
                    external_id,
                    target = adapter.slug(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient write failure, backing off"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// Block until the rate gate admits one target write, or cancellation.
async fn admit_write(
    gate: &RateGate,
    limits: &TierLimit,
    tenant_id: Uuid,
    cancel: &CancellationToken,
) -> Result<(), ExecuteError> {
    loop {
        match gate.admit(tenant_id, OperationClass::TargetWrite, 1, limits) {
            Admission::Allowed => return Ok(()),
            Admission::Denied { retry_after } => {
                debug!(
                    tenant_id = %tenant_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Target write delayed by rate gate"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
                    _ = sleep(retry_after) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::TargetState;
    use crate::config::RateGateConfig;
    use crate::tiers::{Tier, TierLimit};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Adapter scripted to fail a fixed number of times before succeeding.
    struct FlakyAdapter {
        failures: Mutex<Vec<AdapterError>>,
        writes: Mutex<u32>,
    }

    impl FlakyAdapter {
        fn new(failures: Vec<AdapterError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                writes: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl TargetAdapter for FlakyAdapter {
        fn slug(&self) -> &'static str {
            "flaky"
        }

        async fn fetch(
            &self,
            _tenant_id: Uuid,
            _external_id: &str,
        ) -> Result<Option<TargetState>, AdapterError> {
            Ok(None)
        }

        async fn write(
            &self,
            _tenant_id: Uuid,
            _external_id: &str,
            _fields: &BTreeMap<String, JsonValue>,
        ) -> Result<(), AdapterError> {
            *self.writes.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter_factor: 0.0,
        }
    }

    fn gate() -> RateGate {
        RateGate::new(&RateGateConfig {
            window_seconds: 1,
            queued_job_ceiling: 8,
        })
    }

    fn writes() -> BTreeMap<String, JsonValue> {
        BTreeMap::from([("quantity".to_string(), serde_json::json!(7))])
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_counts_one_retry() {
        let adapter: Arc<dyn TargetAdapter> =
            Arc::new(FlakyAdapter::new(vec![AdapterError::transient("timeout")]));
        let limits = TierLimit::for_tier(Tier::Scale);

        let applied = apply_record(
            &adapter,
            &gate(),
            &limits,
            &fast_policy(),
            Uuid::new_v4(),
            "sku-1",
            &writes(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(applied.retries, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let flaky = Arc::new(FlakyAdapter::new(vec![AdapterError::permanent(
            "validation rejected",
        )]));
        let adapter: Arc<dyn TargetAdapter> = flaky.clone();
        let limits = TierLimit::for_tier(Tier::Scale);

        let result = apply_record(
            &adapter,
            &gate(),
            &limits,
            &fast_policy(),
            Uuid::new_v4(),
            "sku-1",
            &writes(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ExecuteError::Adapter {
                error: AdapterError::Permanent { .. },
                retries: 0,
            })
        ));
        assert_eq!(*flaky.writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_attempt_cap_is_enforced() {
        let flaky = Arc::new(FlakyAdapter::new(vec![
            AdapterError::transient("timeout"),
            AdapterError::transient("timeout"),
            AdapterError::transient("timeout"),
            AdapterError::transient("timeout"),
        ]));
        let adapter: Arc<dyn TargetAdapter> = flaky.clone();
        let limits = TierLimit::for_tier(Tier::Scale);

        let result = apply_record(
            &adapter,
            &gate(),
            &limits,
            &fast_policy(),
            Uuid::new_v4(),
            "sku-1",
            &writes(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*flaky.writes.lock().unwrap(), 3);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(4), Duration::from_millis(350));
    }
}
