//! # Job tracker
//!
//! Owns job lifecycle state: the status machine, progress counters, the
//! persisted checkpoint, and the per-job event stream. The tracker is the
//! only writer of a job's row while the job runs.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::RepositoryError;
use crate::models::sync_job;
use crate::repositories::{OutcomeDelta, SyncJobRepository};

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal transitions of the job state machine.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Paused) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,
            (JobStatus::Paused, JobStatus::Running) => true,
            (JobStatus::Paused, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// One record-level error reason, kept on the job's error summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReason {
    pub external_id: String,
    pub reason: String,
}

/// Tallies for one processed chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkStats {
    pub succeeded: i32,
    pub failed: i32,
    pub skipped: i32,
    pub pending: i32,
    pub errors: Vec<ErrorReason>,
    /// False when processing stopped before every record had an outcome
    /// (cancellation mid-chunk or a system error); such a chunk never
    /// commits.
    pub completed: bool,
}

impl ChunkStats {
    pub fn delta(&self) -> OutcomeDelta {
        OutcomeDelta {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            pending: self.pending,
        }
    }
}

/// Event emitted to subscribers as a job progresses.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    StatusChanged {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ChunkCommitted {
        chunk_index: u32,
        checkpoint: i32,
        succeeded: i32,
        failed: i32,
        skipped: i32,
        pending: i32,
    },
}

/// Tracks one job's lifecycle against the database and event stream.
pub struct JobTracker {
    job_id: Uuid,
    tenant_id: Uuid,
    jobs: SyncJobRepository,
    events: broadcast::Sender<JobEvent>,
    error_summary: Mutex<Vec<ErrorReason>>,
    error_summary_limit: usize,
}

impl JobTracker {
    /// Build a tracker for a job, seeding the error summary from the row so
    /// a resumed job keeps its earlier reasons.
    pub fn new(
        db: DatabaseConnection,
        job: &sync_job::Model,
        events: broadcast::Sender<JobEvent>,
        error_summary_limit: usize,
    ) -> Self {
        let seeded = job
            .error_summary
            .as_ref()
            .and_then(|value| serde_json::from_value::<Vec<ErrorReason>>(value.clone()).ok())
            .unwrap_or_default();

        Self {
            job_id: job.id,
            tenant_id: job.tenant_id,
            jobs: SyncJobRepository::new(db),
            events,
            error_summary: Mutex::new(seeded),
            error_summary_limit,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// queued -> running, on first successful chunk admission.
    pub async fn mark_running(&self) -> Result<sync_job::Model, RepositoryError> {
        let model = self.jobs.mark_running(self.job_id).await?;

        info!(tenant_id = %self.tenant_id, job_id = %self.job_id, "Job running");
        self.emit(JobEventKind::StatusChanged {
            status: JobStatus::Running,
            reason: None,
        });

        Ok(model)
    }

    /// Persist a chunk commit: checkpoint advance plus counter rollup.
    /// Called only for the contiguous prefix the ledger releases.
    pub async fn commit_chunk(
        &self,
        chunk_index: u32,
        stats: &ChunkStats,
    ) -> Result<sync_job::Model, RepositoryError> {
        let summary = {
            let mut guard = self
                .error_summary
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            let room = self.error_summary_limit.saturating_sub(guard.len());
            guard.extend(stats.errors.iter().take(room).cloned());
            serde_json::to_value(&*guard).ok()
        };

        let model = self
            .jobs
            .commit_chunk(self.job_id, chunk_index as i32, stats.delta(), summary)
            .await?;

        counter!("sync_chunks_committed_total").increment(1);
        counter!("sync_records_total", "action" => "succeeded")
            .increment(stats.succeeded.max(0) as u64);
        counter!("sync_records_total", "action" => "failed").increment(stats.failed.max(0) as u64);
        counter!("sync_records_total", "action" => "skipped")
            .increment(stats.skipped.max(0) as u64);
        counter!("sync_records_total", "action" => "pending")
            .increment(stats.pending.max(0) as u64);

        self.emit(JobEventKind::ChunkCommitted {
            chunk_index,
            checkpoint: model.checkpoint,
            succeeded: model.succeeded_records,
            failed: model.failed_records,
            skipped: model.skipped_records,
            pending: model.pending_records,
        });

        Ok(model)
    }

    /// Move the job to a new status, validating the transition.
    pub async fn finalize(
        &self,
        from: JobStatus,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<sync_job::Model, RepositoryError> {
        if !from.can_transition(to) {
            return Err(RepositoryError::validation_error(format!(
                "illegal job transition {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let summary = {
            let guard = self
                .error_summary
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if guard.is_empty() {
                None
            } else {
                serde_json::to_value(&*guard).ok()
            }
        };

        let model = self
            .jobs
            .update_status(self.job_id, to.as_str(), summary)
            .await?;

        counter!("sync_jobs_total", "status" => to.as_str()).increment(1);
        self.emit(JobEventKind::StatusChanged { status: to, reason });

        Ok(model)
    }

    fn emit(&self, kind: JobEventKind) {
        // Subscribers may come and go; a send with no receivers is fine.
        let _ = self.events.send(JobEvent {
            job_id: self.job_id,
            at: Utc::now(),
            kind,
        });
    }
}

/// Reason the failure-rate threshold aborts a job, if it does.
pub fn failure_threshold_reason(job: &sync_job::Model, config: &EngineConfig) -> Option<String> {
    let attempted =
        job.succeeded_records + job.failed_records + job.skipped_records + job.pending_records;

    if attempted < config.failure_rate_min_records as i32 || attempted == 0 {
        return None;
    }

    let rate = job.failed_records as f64 / attempted as f64;
    if rate > config.failure_rate_threshold {
        Some(format!(
            "failure rate {:.0}% exceeded threshold {:.0}% ({} of {} attempted records failed)",
            rate * 100.0,
            config.failure_rate_threshold * 100.0,
            job.failed_records,
            attempted
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("draining"), None);
    }

    #[test]
    fn test_state_machine_transitions() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Running));
        assert!(JobStatus::Running.can_transition(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition(JobStatus::Running));
        assert!(JobStatus::Running.can_transition(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition(JobStatus::Cancelled));

        // No resurrection of terminal jobs, no skipping queued -> paused.
        assert!(!JobStatus::Completed.can_transition(JobStatus::Running));
        assert!(!JobStatus::Cancelled.can_transition(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition(JobStatus::Paused));
        assert!(!JobStatus::Paused.can_transition(JobStatus::Completed));
    }

    fn job_with_counts(succeeded: i32, failed: i32, skipped: i32, pending: i32) -> sync_job::Model {
        sync_job::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            operation_type: "inventory-sync".to_string(),
            target_slug: "shopify".to_string(),
            status: "running".to_string(),
            total_records: 100,
            chunk_size: 25,
            checkpoint: 0,
            succeeded_records: succeeded,
            failed_records: failed,
            skipped_records: skipped,
            pending_records: pending,
            field_policies: None,
            error_summary: None,
            created_at: Utc::now().fixed_offset(),
            started_at: None,
            finished_at: None,
            updated_at: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn test_failure_threshold_triggers_past_half() {
        let config = EngineConfig::default();

        // 30 of 40 attempted failed: well past the 50% default.
        let job = job_with_counts(10, 30, 0, 0);
        assert!(failure_threshold_reason(&job, &config).is_some());

        // 10 of 40 failed: fine.
        let job = job_with_counts(30, 10, 0, 0);
        assert!(failure_threshold_reason(&job, &config).is_none());
    }

    #[test]
    fn test_failure_threshold_waits_for_min_records() {
        let config = EngineConfig::default(); // min 20 attempted

        let job = job_with_counts(1, 9, 0, 0);
        assert!(failure_threshold_reason(&job, &config).is_none());
    }
}
