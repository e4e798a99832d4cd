//! # Synchronization Engine
//!
//! The bulk synchronization core: accepts job submissions, splits record
//! sets into chunks, throttles work through the rate gate, processes and
//! resolves each record against a target-system adapter, and tracks every
//! job to an auditable per-record outcome.
//!
//! Execution is out of order across a bounded worker pool, but checkpoints
//! commit strictly in chunk-index order, so a resumed job reprocesses at
//! most the first uncommitted chunk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use metrics::{gauge, histogram};
use sea_orm::DatabaseConnection;
use serde_json::Value as JsonValue;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, TargetAdapter};
use crate::config::AppConfig;
use crate::error::RepositoryError;
use crate::models::sync_job;
use crate::repositories::{
    JobRecordRepository, NewJobRecord, NewRecordOutcome, NewReviewItem, NewSyncJob,
    RecordOutcomeRepository, ReviewItemRepository, SyncJobRepository, TenantRepository,
};
use crate::tiers::TierLimit;

pub mod chunk;
pub mod drift;
pub mod executor;
pub mod processor;
pub mod rate_gate;
pub mod resolver;
pub mod tracker;


use chunk::{ChunkPlan, CommitLedger, chunk_count, plan_chunks};
use drift::DriftGuard;
use executor::{ExecuteError, RetryPolicy, apply_record};
use processor::{OperationType, PolicyTable, RecordPlan, SourceRecord, plan_record};
use rate_gate::{Admission, OperationClass, RateGate};
use resolver::Resolution;
use tracker::{
    ChunkStats, ErrorReason, JobEvent, JobStatus, JobTracker, failure_threshold_reason,
};

/// Errors surfaced by the engine's public surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<u64>,
    },
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("tenant {0} not found")]
    TenantNotFound(Uuid),
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("invalid job state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<EngineError> for crate::error::ApiError {
    fn from(error: EngineError) -> Self {
        use axum::http::StatusCode;

        match error {
            EngineError::QuotaExceeded {
                message,
                retry_after,
            } => crate::error::quota_exceeded(&message, retry_after),
            EngineError::UnknownTarget(slug) => crate::error::validation_error(
                "Unknown target system",
                serde_json::json!({ "target": slug }),
            ),
            EngineError::Validation(message) => crate::error::validation_error(
                "Invalid job submission",
                serde_json::json!({ "detail": message }),
            ),
            EngineError::TenantNotFound(tenant_id) => crate::error::ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Tenant not found: {}", tenant_id),
            ),
            EngineError::JobNotFound(job_id) => crate::error::ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Job not found: {}", job_id),
            ),
            EngineError::InvalidState(message) => {
                crate::error::ApiError::new(StatusCode::CONFLICT, "CONFLICT", &message)
            }
            EngineError::Repository(err) => err.into(),
        }
    }
}

/// One record in a job submission.
#[derive(Debug, Clone)]
pub struct SubmittedRecord {
    pub external_id: String,
    pub fields: JsonValue,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// A bulk job submission.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub operation_type: String,
    pub target_slug: String,
    pub chunk_size: Option<usize>,
    pub field_policies: Option<JsonValue>,
    pub records: Vec<SubmittedRecord>,
}

/// Control handles for a non-terminal job.
#[derive(Clone)]
struct JobHandle {
    cancel: CancellationToken,
    pause: CancellationToken,
    events: broadcast::Sender<JobEvent>,
    /// True while a run loop is driving the job; false while it drains
    /// reviews or sits paused.
    loop_active: Arc<AtomicBool>,
}

impl JobHandle {
    fn new(events: broadcast::Sender<JobEvent>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: CancellationToken::new(),
            events,
            loop_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fresh tokens for a resumed run, keeping the event stream alive.
    fn reset(&self) -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: CancellationToken::new(),
            events: self.events.clone(),
            loop_active: self.loop_active.clone(),
        }
    }
}

struct EngineInner {
    db: DatabaseConnection,
    config: Arc<AppConfig>,
    registry: AdapterRegistry,
    rate_gate: RateGate,
    global_workers: Arc<Semaphore>,
    retry: RetryPolicy,
    drift: DriftGuard,
    jobs: StdMutex<HashMap<Uuid, JobHandle>>,
}

/// The synchronization engine facade handed to the HTTP surface.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(db: DatabaseConnection, config: Arc<AppConfig>, registry: AdapterRegistry) -> Self {
        let rate_gate = RateGate::new(&config.rate_gate);
        let global_workers = Arc::new(Semaphore::new(config.engine.worker_cap));
        let retry = RetryPolicy::from_config(&config.retry);
        let drift = DriftGuard::from_config(&config.drift);

        Self {
            inner: Arc::new(EngineInner {
                db,
                config,
                registry,
                rate_gate,
                global_workers,
                retry,
                drift,
                jobs: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit a bulk job. Validates the submission against the tenant's
    /// tier, persists the job and its record set, and spawns the run.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn submit(
        &self,
        tenant_id: Uuid,
        submission: JobSubmission,
    ) -> Result<sync_job::Model, EngineError> {
        let inner = &self.inner;

        let tenant = TenantRepository::new(inner.db.clone())
            .find(tenant_id)
            .await?
            .ok_or(EngineError::TenantNotFound(tenant_id))?;
        let limits = TierLimit::for_tier_slug(&tenant.tier)
            .map_err(|err| EngineError::Validation(err.to_string()))?;

        let operation = OperationType::parse(&submission.operation_type).ok_or_else(|| {
            EngineError::Validation(format!(
                "unknown operation type '{}' (expected one of: inventory-sync, price-sync, bulk-import)",
                submission.operation_type
            ))
        })?;

        inner
            .registry
            .get(&submission.target_slug)
            .map_err(|_| EngineError::UnknownTarget(submission.target_slug.clone()))?;

        if submission.records.is_empty() {
            return Err(EngineError::Validation(
                "submission contains no records".to_string(),
            ));
        }

        let policies = PolicyTable::from_json(submission.field_policies.as_ref())
            .map_err(EngineError::Validation)?;

        if submission.records.len() > limits.max_records_per_job {
            return Err(EngineError::QuotaExceeded {
                message: format!(
                    "record count {} exceeds the tier limit of {} records per bulk operation",
                    submission.records.len(),
                    limits.max_records_per_job
                ),
                retry_after: None,
            });
        }

        let active = SyncJobRepository::new(inner.db.clone())
            .count_active(tenant_id)
            .await?;
        let ceiling = limits.max_concurrent_jobs + inner.rate_gate.queued_job_ceiling();
        if active as usize >= ceiling {
            return Err(EngineError::QuotaExceeded {
                message: format!(
                    "{} jobs already queued or running; hard ceiling is {}",
                    active, ceiling
                ),
                retry_after: Some(60),
            });
        }

        let chunk_size = match submission.chunk_size {
            Some(0) => {
                return Err(EngineError::Validation(
                    "chunk size must be at least 1".to_string(),
                ));
            }
            Some(requested) => requested.min(limits.max_chunk_size),
            None => inner
                .config
                .engine
                .default_chunk_size
                .min(limits.max_chunk_size),
        };

        let job = SyncJobRepository::new(inner.db.clone())
            .create(NewSyncJob {
                tenant_id,
                operation_type: operation.as_str().to_string(),
                target_slug: submission.target_slug.clone(),
                total_records: submission.records.len() as i32,
                chunk_size: chunk_size as i32,
                field_policies: Some(policies.to_json()),
            })
            .await?;

        let records = submission
            .records
            .into_iter()
            .enumerate()
            .map(|(position, record)| NewJobRecord {
                position: position as i32,
                external_id: record.external_id,
                payload: record.fields,
                source_modified_at: record.last_modified,
            })
            .collect();
        JobRecordRepository::new(inner.db.clone())
            .insert_batch(job.id, tenant_id, records)
            .await?;

        self.spawn_run(job.clone(), limits, None);

        Ok(job)
    }

    /// Pause a running job: in-flight chunks finish, no new ones dispatch.
    pub async fn pause(&self, tenant_id: Uuid, job_id: Uuid) -> Result<(), EngineError> {
        let job = self.require_job(tenant_id, job_id).await?;
        let status = parse_status(&job)?;

        if !status.can_transition(JobStatus::Paused) {
            return Err(EngineError::InvalidState(format!(
                "cannot pause a {} job",
                status.as_str()
            )));
        }

        let handle = self
            .handle_for(job_id)
            .ok_or_else(|| EngineError::InvalidState("job is not being driven".to_string()))?;

        info!(tenant_id = %tenant_id, job_id = %job_id, "Pause requested");
        handle.pause.cancel();
        Ok(())
    }

    /// Resume a paused job from its checkpoint.
    pub async fn resume(&self, tenant_id: Uuid, job_id: Uuid) -> Result<(), EngineError> {
        let job = self.require_job(tenant_id, job_id).await?;
        let status = parse_status(&job)?;

        if status != JobStatus::Paused {
            return Err(EngineError::InvalidState(format!(
                "cannot resume a {} job",
                status.as_str()
            )));
        }

        let tenant = TenantRepository::new(self.inner.db.clone())
            .find(tenant_id)
            .await?
            .ok_or(EngineError::TenantNotFound(tenant_id))?;
        let limits = TierLimit::for_tier_slug(&tenant.tier)
            .map_err(|err| EngineError::Validation(err.to_string()))?;

        info!(tenant_id = %tenant_id, job_id = %job_id, checkpoint = job.checkpoint, "Resume requested");
        self.spawn_run(job, limits, self.handle_for(job_id));
        Ok(())
    }

    /// Cancel a job. Draining behavior matches pause, but the job is
    /// terminal afterwards.
    pub async fn cancel(&self, tenant_id: Uuid, job_id: Uuid) -> Result<(), EngineError> {
        let job = self.require_job(tenant_id, job_id).await?;
        let status = parse_status(&job)?;

        if !status.can_transition(JobStatus::Cancelled) {
            return Err(EngineError::InvalidState(format!(
                "cannot cancel a {} job",
                status.as_str()
            )));
        }

        info!(tenant_id = %tenant_id, job_id = %job_id, "Cancellation requested");

        let handle = self.handle_for(job_id);
        match handle {
            Some(handle) if handle.loop_active.load(Ordering::SeqCst) => {
                // The run loop observes the token and finalizes the job.
                handle.cancel.cancel();
            }
            _ => {
                // No loop to drain (paused, or draining on reviews):
                // finalize directly.
                SyncJobRepository::new(self.inner.db.clone())
                    .update_status(job_id, JobStatus::Cancelled.as_str(), None)
                    .await?;
                self.remove_handle(job_id);
            }
        }

        Ok(())
    }

    /// Subscribe to a job's event stream, if the job is still live.
    pub fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<JobEvent>> {
        self.handle_for(job_id).map(|handle| handle.events.subscribe())
    }

    /// Re-drive jobs that were queued or running when the process stopped.
    /// Checkpointed chunks are never reprocessed; the first uncommitted
    /// chunk is redelivered at least once, which skip-on-match makes
    /// idempotent.
    pub async fn resume_interrupted(&self) -> Result<usize, EngineError> {
        let jobs = SyncJobRepository::new(self.inner.db.clone())
            .list_interrupted()
            .await?;
        let tenants = TenantRepository::new(self.inner.db.clone());

        let mut resumed = 0;
        for job in jobs {
            let Some(tenant) = tenants.find(job.tenant_id).await? else {
                warn!(job_id = %job.id, tenant_id = %job.tenant_id, "Skipping orphaned job: tenant missing");
                continue;
            };
            let limits = match TierLimit::for_tier_slug(&tenant.tier) {
                Ok(limits) => limits,
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "Skipping job on unknown tier");
                    continue;
                }
            };

            info!(job_id = %job.id, checkpoint = job.checkpoint, "Resuming interrupted job");
            self.spawn_run(job, limits, None);
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Called after a review item is resolved: drop the pending counter
    /// once the record's last open item closes, and complete the job once
    /// nothing blocks it.
    pub async fn review_resolved(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        external_id: &str,
    ) -> Result<sync_job::Model, EngineError> {
        let jobs = SyncJobRepository::new(self.inner.db.clone());
        let reviews = ReviewItemRepository::new(self.inner.db.clone());

        let record_open = reviews.count_open_for_record(job_id, external_id).await?;
        let job = if record_open == 0 {
            jobs.decrement_pending(job_id).await?
        } else {
            jobs.find_by_id(job_id)
                .await?
                .ok_or(EngineError::JobNotFound(job_id))?
        };

        let status = parse_status(&job)?;
        if status.is_terminal() {
            return Ok(job);
        }

        let total_chunks = chunk_count(job.total_records as usize, job.chunk_size.max(1) as usize);
        let all_committed = job.checkpoint == total_chunks as i32 - 1;
        let open = reviews.count_open(job_id).await?;

        if status == JobStatus::Running && all_committed && open == 0 {
            let model = jobs
                .update_status(job_id, JobStatus::Completed.as_str(), None)
                .await?;
            info!(tenant_id = %tenant_id, job_id = %job_id, "Job completed after final review resolution");
            self.remove_handle(job_id);
            return Ok(model);
        }

        Ok(job)
    }

    async fn require_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
    ) -> Result<sync_job::Model, EngineError> {
        SyncJobRepository::new(self.inner.db.clone())
            .find_by_tenant(tenant_id, job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    fn handle_for(&self, job_id: Uuid) -> Option<JobHandle> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(&job_id)
            .cloned()
    }

    fn remove_handle(&self, job_id: Uuid) {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(&job_id);
    }

    /// Register (or reset) the job's handle and spawn its run loop.
    fn spawn_run(&self, job: sync_job::Model, limits: TierLimit, existing: Option<JobHandle>) {
        let handle = match existing {
            Some(handle) => handle.reset(),
            None => JobHandle::new(broadcast::channel(256).0),
        };

        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(job.id, handle.clone());

        let inner = self.inner.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            run_job(inner, engine, job, limits, handle).await;
        });
    }
}

fn parse_status(job: &sync_job::Model) -> Result<JobStatus, EngineError> {
    JobStatus::parse(&job.status)
        .ok_or_else(|| EngineError::InvalidState(format!("unknown job status '{}'", job.status)))
}

/// How a run loop ended.
enum RunEnd {
    Completed,
    /// All chunks committed but open review items block completion
    Draining { open_reviews: u64 },
    Paused,
    Cancelled,
    Failed { reason: String },
}

async fn run_job(
    inner: Arc<EngineInner>,
    engine: SyncEngine,
    job: sync_job::Model,
    limits: TierLimit,
    handle: JobHandle,
) {
    handle.loop_active.store(true, Ordering::SeqCst);
    gauge!("sync_jobs_in_flight").increment(1.0);

    // Per-tenant concurrency cap: wait here while the tenant is at its
    // limit. The queued-job ceiling was enforced at submission.
    let permits = inner.rate_gate.job_permits(job.tenant_id, &limits);
    let permit = tokio::select! {
        _ = handle.cancel.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    };

    let end = if permit.is_none() && !handle.cancel.is_cancelled() {
        // Semaphore closed; nothing sensible left to do.
        RunEnd::Failed {
            reason: "job permit semaphore closed".to_string(),
        }
    } else if handle.cancel.is_cancelled() {
        RunEnd::Cancelled
    } else {
        match drive_job(&inner, &job, &limits, &handle).await {
            Ok(end) => end,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Job run failed with system error");
                RunEnd::Failed {
                    reason: format!("system error: {}", err),
                }
            }
        }
    };

    finalize_run(&inner, &engine, &job, &handle, end).await;

    handle.loop_active.store(false, Ordering::SeqCst);
    gauge!("sync_jobs_in_flight").decrement(1.0);
    drop(permit);
}

async fn finalize_run(
    inner: &Arc<EngineInner>,
    engine: &SyncEngine,
    job: &sync_job::Model,
    handle: &JobHandle,
    end: RunEnd,
) {
    let tracker = JobTracker::new(
        inner.db.clone(),
        job,
        handle.events.clone(),
        inner.config.engine.error_summary_limit,
    );

    // Re-read the status the commit loop left behind.
    let current = SyncJobRepository::new(inner.db.clone())
        .find_by_id(job.id)
        .await
        .ok()
        .flatten()
        .and_then(|model| JobStatus::parse(&model.status))
        .unwrap_or(JobStatus::Running);

    let outcome = match end {
        RunEnd::Completed => tracker.finalize(current, JobStatus::Completed, None).await,
        RunEnd::Cancelled => {
            tracker
                .finalize(current, JobStatus::Cancelled, Some("cancelled by caller".to_string()))
                .await
        }
        RunEnd::Paused => {
            tracker
                .finalize(current, JobStatus::Paused, Some("paused by caller".to_string()))
                .await
        }
        RunEnd::Failed { reason } => {
            tracker
                .finalize(current, JobStatus::Failed, Some(reason))
                .await
        }
        RunEnd::Draining { open_reviews } => {
            info!(
                job_id = %job.id,
                open_reviews,
                "All chunks committed; job held open by pending reviews"
            );
            schedule_review_stall_warning(inner, job.id);
            // Status stays running; the review surface completes the job.
            return;
        }
    };

    match outcome {
        Ok(model) => {
            if JobStatus::parse(&model.status).map(|s| s.is_terminal()) == Some(true) {
                engine.remove_handle(job.id);
            }
        }
        Err(err) => {
            error!(job_id = %job.id, error = %err, "Failed to finalize job status");
        }
    }
}

fn schedule_review_stall_warning(inner: &Arc<EngineInner>, job_id: Uuid) {
    let warn_after = Duration::from_secs(inner.config.engine.review_stall_warn_seconds);
    let db = inner.db.clone();

    tokio::spawn(async move {
        sleep(warn_after).await;
        if let Ok(Some(job)) = SyncJobRepository::new(db).find_by_id(job_id).await
            && job.status == "running"
            && job.pending_records > 0
        {
            warn!(
                job_id = %job_id,
                pending_records = job.pending_records,
                stalled_secs = warn_after.as_secs(),
                "Job still waiting on manual review"
            );
        }
    });
}

/// Shared context for chunk workers.
struct ChunkContext {
    inner: Arc<EngineInner>,
    job_id: Uuid,
    tenant_id: Uuid,
    operation: OperationType,
    policies: PolicyTable,
    adapter: Arc<dyn TargetAdapter>,
    limits: TierLimit,
    cancel: CancellationToken,
}

async fn drive_job(
    inner: &Arc<EngineInner>,
    job: &sync_job::Model,
    limits: &TierLimit,
    handle: &JobHandle,
) -> Result<RunEnd, EngineError> {
    let operation = OperationType::parse(&job.operation_type).ok_or_else(|| {
        EngineError::Validation(format!("job has unknown operation type '{}'", job.operation_type))
    })?;
    let policies =
        PolicyTable::from_json(job.field_policies.as_ref()).map_err(EngineError::Validation)?;
    let adapter = inner
        .registry
        .get(&job.target_slug)
        .map_err(|_| EngineError::UnknownTarget(job.target_slug.clone()))?;

    let chunk_size = job.chunk_size.max(1) as usize;
    let total_records = job.total_records.max(0) as usize;
    let total_chunks = chunk_count(total_records, chunk_size);
    let plan = plan_chunks(total_records, chunk_size, job.checkpoint);

    let tracker = Arc::new(JobTracker::new(
        inner.db.clone(),
        job,
        handle.events.clone(),
        inner.config.engine.error_summary_limit,
    ));

    if plan.is_empty() {
        tracker.mark_running().await?;
        return Ok(completion_state(inner, job.id, total_chunks, job.checkpoint).await?);
    }

    // Failure-threshold aborts propagate through this token so both the
    // dispatch loop and in-flight chunks stop promptly.
    let abort = CancellationToken::new();
    let workers = limits.chunk_concurrency.clamp(1, inner.config.engine.worker_cap);
    let worker_sem = Arc::new(Semaphore::new(workers));
    let (tx, rx) = mpsc::channel::<(u32, ChunkStats)>(plan.len().max(1));

    let context = Arc::new(ChunkContext {
        inner: inner.clone(),
        job_id: job.id,
        tenant_id: job.tenant_id,
        operation,
        policies,
        adapter,
        limits: *limits,
        cancel: handle.cancel.clone(),
    });

    let commit_task = tokio::spawn(commit_loop(
        rx,
        tracker.clone(),
        CommitLedger::new(job.checkpoint),
        inner.config.engine.clone(),
        abort.clone(),
    ));

    let mut marked_running = job.status == "running";

    'dispatch: for chunk in plan {
        if handle.cancel.is_cancelled() || handle.pause.is_cancelled() || abort.is_cancelled() {
            break;
        }

        // Admission: block until the rate gate lets this chunk through.
        loop {
            match inner.rate_gate.admit(
                job.tenant_id,
                OperationClass::ChunkDispatch,
                chunk.len as u32,
                limits,
            ) {
                Admission::Allowed => break,
                Admission::Denied { retry_after } => {
                    tokio::select! {
                        _ = handle.cancel.cancelled() => break 'dispatch,
                        _ = handle.pause.cancelled() => break 'dispatch,
                        _ = abort.cancelled() => break 'dispatch,
                        _ = sleep(retry_after) => {}
                    }
                }
            }
        }

        if !marked_running {
            tracker.mark_running().await?;
            marked_running = true;
        }

        let worker_permit = tokio::select! {
            _ = handle.cancel.cancelled() => break 'dispatch,
            _ = abort.cancelled() => break 'dispatch,
            permit = worker_sem.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break 'dispatch,
            },
        };
        let global_permit = tokio::select! {
            _ = handle.cancel.cancelled() => break 'dispatch,
            _ = abort.cancelled() => break 'dispatch,
            permit = inner.global_workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break 'dispatch,
            },
        };

        let context = context.clone();
        let tx = tx.clone();
        let abort = abort.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let stats = process_chunk(&context, &abort, chunk).await;
            histogram!("sync_chunk_duration_ms")
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            let _ = tx.send((chunk.index, stats)).await;
            drop(worker_permit);
            drop(global_permit);
        });
    }
    drop(tx);

    let committed = commit_task
        .await
        .map_err(|err| EngineError::Validation(format!("commit loop panicked: {}", err)))??;

    if handle.cancel.is_cancelled() {
        return Ok(RunEnd::Cancelled);
    }
    if let Some(reason) = committed.abort_reason {
        return Ok(RunEnd::Failed { reason });
    }
    if handle.pause.is_cancelled() {
        return Ok(RunEnd::Paused);
    }

    if committed.checkpoint == total_chunks as i32 - 1 {
        Ok(completion_state(inner, job.id, total_chunks, committed.checkpoint).await?)
    } else {
        // A gap without pause or cancel means a chunk died mid-flight.
        Ok(RunEnd::Failed {
            reason: format!(
                "chunk processing stopped at checkpoint {} of {}",
                committed.checkpoint,
                total_chunks as i32 - 1
            ),
        })
    }
}

async fn completion_state(
    inner: &Arc<EngineInner>,
    job_id: Uuid,
    total_chunks: u32,
    checkpoint: i32,
) -> Result<RunEnd, EngineError> {
    debug_assert!(checkpoint == total_chunks as i32 - 1);

    let open_reviews = ReviewItemRepository::new(inner.db.clone())
        .count_open(job_id)
        .await?;

    if open_reviews == 0 {
        Ok(RunEnd::Completed)
    } else {
        Ok(RunEnd::Draining { open_reviews })
    }
}

struct CommitSummary {
    checkpoint: i32,
    abort_reason: Option<String>,
}

/// Receives completed chunks and advances the checkpoint strictly in index
/// order. Also the single place the failure-rate threshold is evaluated,
/// since it owns the authoritative counters.
async fn commit_loop(
    mut rx: mpsc::Receiver<(u32, ChunkStats)>,
    tracker: Arc<JobTracker>,
    mut ledger: CommitLedger,
    config: crate::config::EngineConfig,
    abort: CancellationToken,
) -> Result<CommitSummary, EngineError> {
    let mut pending: HashMap<u32, ChunkStats> = HashMap::new();
    let mut abort_reason: Option<String> = None;

    while let Some((index, stats)) = rx.recv().await {
        if !stats.completed {
            // The chunk stopped before every record had an outcome; it
            // stays uncommitted and pins the checkpoint below it.
            continue;
        }

        pending.insert(index, stats);
        for committable in ledger.record(index) {
            let stats = match pending.remove(&committable) {
                Some(stats) => stats,
                None => {
                    error!(
                        job_id = %tracker.job_id(),
                        chunk_index = committable,
                        "Commit ledger released a chunk with no recorded stats"
                    );
                    continue;
                }
            };

            let model = tracker.commit_chunk(committable, &stats).await?;

            if abort_reason.is_none()
                && let Some(reason) = failure_threshold_reason(&model, &config)
            {
                warn!(job_id = %tracker.job_id(), reason = %reason, "Aborting job past failure threshold");
                abort_reason = Some(reason);
                abort.cancel();
            }
        }
    }

    Ok(CommitSummary {
        checkpoint: ledger.checkpoint(),
        abort_reason,
    })
}

/// Process one chunk: per record, fetch target state, plan, resolve, apply,
/// and append the outcome. The cancellation flag is checked between records,
/// never mid-write.
async fn process_chunk(
    context: &ChunkContext,
    abort: &CancellationToken,
    chunk: ChunkPlan,
) -> ChunkStats {
    let mut stats = ChunkStats::default();

    let records = match JobRecordRepository::new(context.inner.db.clone())
        .fetch_range(context.job_id, chunk.offset, chunk.len)
        .await
    {
        Ok(records) => records,
        Err(err) => {
            error!(
                job_id = %context.job_id,
                chunk_index = chunk.index,
                error = %err,
                "Failed to read chunk records"
            );
            return stats;
        }
    };

    for model in &records {
        if context.cancel.is_cancelled() || abort.is_cancelled() {
            return stats;
        }

        let record = SourceRecord::from_model(model);
        match process_record(context, chunk.index, &record, &mut stats).await {
            RecordControl::Continue => {}
            RecordControl::Stop => return stats,
        }
    }

    stats.completed = true;
    stats
}

enum RecordControl {
    Continue,
    Stop,
}

async fn process_record(
    context: &ChunkContext,
    chunk_index: u32,
    record: &SourceRecord,
    stats: &mut ChunkStats,
) -> RecordControl {
    let outcomes = RecordOutcomeRepository::new(context.inner.db.clone());
    let reviews = ReviewItemRepository::new(context.inner.db.clone());

    // Current target state; a fetch failure is a failed record, not a
    // chunk abort.
    let target = match context
        .adapter
        .fetch(context.tenant_id, &record.external_id)
        .await
    {
        Ok(target) => target,
        Err(err) => {
            record_failure(context, &outcomes, chunk_index, record, stats, 0, format!(
                "target fetch failed: {}",
                err
            ))
            .await;
            return RecordControl::Continue;
        }
    };

    let plan = plan_record(
        context.operation,
        record,
        target.as_ref(),
        &context.policies,
        &context.inner.drift,
    );

    match plan {
        RecordPlan::Invalid { reason } => {
            record_failure(context, &outcomes, chunk_index, record, stats, 0, reason).await;
            RecordControl::Continue
        }
        RecordPlan::Skip => {
            stats.skipped += 1;
            append_outcome(
                &outcomes,
                context,
                chunk_index,
                record,
                "skipped",
                None,
                None,
                None,
                0,
            )
            .await;
            RecordControl::Continue
        }
        RecordPlan::Create { writes } => {
            apply_and_record(context, &outcomes, chunk_index, record, stats, "created", None, writes)
                .await
        }
        RecordPlan::Diff {
            mut writes,
            conflicts,
            before,
        } => {
            let mut manual = Vec::new();
            for conflict in &conflicts {
                match resolver::resolve(context.job_id, &record.external_id, conflict) {
                    Resolution::UseValue(value) => {
                        writes.insert(conflict.field.clone(), value);
                    }
                    Resolution::KeepTarget => {}
                    Resolution::Manual => manual.push(conflict.clone()),
                }
            }

            if !manual.is_empty() {
                // Record-level atomicity: a record with any manual conflict
                // is applied all-or-nothing, so nothing is written now.
                for conflict in &manual {
                    let item = NewReviewItem {
                        job_id: context.job_id,
                        tenant_id: context.tenant_id,
                        external_id: record.external_id.clone(),
                        field: conflict.field.clone(),
                        source_value: conflict.source_value.clone(),
                        target_value: conflict.target_value.clone(),
                    };
                    if let Err(err) = reviews.create(item).await {
                        error!(
                            job_id = %context.job_id,
                            external_id = %record.external_id,
                            error = %err,
                            "Failed to persist review item"
                        );
                    }
                }

                stats.pending += 1;
                append_outcome(
                    &outcomes,
                    context,
                    chunk_index,
                    record,
                    "pending_review",
                    Some(serde_json::to_value(&before).unwrap_or(JsonValue::Null)),
                    None,
                    None,
                    0,
                )
                .await;
                return RecordControl::Continue;
            }

            if writes.is_empty() {
                // Every divergence resolved to the target's value.
                stats.skipped += 1;
                append_outcome(
                    &outcomes,
                    context,
                    chunk_index,
                    record,
                    "skipped",
                    None,
                    None,
                    None,
                    0,
                )
                .await;
                return RecordControl::Continue;
            }

            apply_and_record(
                context,
                &outcomes,
                chunk_index,
                record,
                stats,
                "updated",
                Some(serde_json::to_value(&before).unwrap_or(JsonValue::Null)),
                writes,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_and_record(
    context: &ChunkContext,
    outcomes: &RecordOutcomeRepository,
    chunk_index: u32,
    record: &SourceRecord,
    stats: &mut ChunkStats,
    action: &str,
    before: Option<JsonValue>,
    writes: std::collections::BTreeMap<String, JsonValue>,
) -> RecordControl {
    let applied = apply_record(
        &context.adapter,
        &context.inner.rate_gate,
        &context.limits,
        &context.inner.retry,
        context.tenant_id,
        &record.external_id,
        &writes,
        &context.cancel,
    )
    .await;

    match applied {
        Ok(applied) => {
            stats.succeeded += 1;
            append_outcome(
                outcomes,
                context,
                chunk_index,
                record,
                action,
                before,
                Some(serde_json::to_value(&writes).unwrap_or(JsonValue::Null)),
                None,
                applied.retries as i32,
            )
            .await;
            RecordControl::Continue
        }
        Err(ExecuteError::Cancelled) => {
            // Nothing was written for this record; the chunk stays
            // incomplete and uncommitted.
            RecordControl::Stop
        }
        Err(ExecuteError::Adapter { error, retries }) => {
            record_failure(
                context,
                outcomes,
                chunk_index,
                record,
                stats,
                retries as i32,
                format!("target write failed: {}", error),
            )
            .await;
            RecordControl::Continue
        }
    }
}

async fn record_failure(
    context: &ChunkContext,
    outcomes: &RecordOutcomeRepository,
    chunk_index: u32,
    record: &SourceRecord,
    stats: &mut ChunkStats,
    retry_count: i32,
    reason: String,
) {
    stats.failed += 1;
    stats.errors.push(ErrorReason {
        external_id: record.external_id.clone(),
        reason: reason.clone(),
    });

    append_outcome(
        outcomes,
        context,
        chunk_index,
        record,
        "failed",
        None,
        None,
        Some(reason),
        retry_count,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn append_outcome(
    outcomes: &RecordOutcomeRepository,
    context: &ChunkContext,
    chunk_index: u32,
    record: &SourceRecord,
    action: &str,
    before: Option<JsonValue>,
    after: Option<JsonValue>,
    error_detail: Option<String>,
    retry_count: i32,
) {
    let outcome = NewRecordOutcome {
        job_id: context.job_id,
        tenant_id: context.tenant_id,
        chunk_index: chunk_index as i32,
        external_id: record.external_id.clone(),
        action: action.to_string(),
        before,
        after,
        error_detail,
        retry_count,
    };

    if let Err(err) = outcomes.append(outcome).await {
        error!(
            job_id = %context.job_id,
            external_id = %record.external_id,
            error = %err,
            "Failed to append record outcome"
        );
    }
}
