//! # Jobs API Handlers
//!
//! This module contains handlers for submitting and managing bulk
//! synchronization jobs: submission, listing, status polling, lifecycle
//! controls, the per-job SSE event stream, and the record outcome audit
//! trail.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension};
use crate::engine::{JobSubmission, SubmittedRecord};
use crate::error::{ApiError, validation_error};
use crate::models::{record_outcome, sync_job};
use crate::repositories::{RecordOutcomeRepository, SyncJobRepository};
use crate::server::AppState;

/// One record in a job submission
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRecord {
    /// Record identifier shared by source and target systems
    #[schema(example = "sku-1042")]
    pub id: String,
    /// Field name/value pairs to synchronize
    #[schema(example = json!({"quantity": 7, "price": 19.99}))]
    pub fields: serde_json::Value,
    /// Last-modified timestamp in the source system (RFC3339)
    #[serde(default)]
    #[schema(example = "2025-11-10T12:00:00Z")]
    pub last_modified: Option<String>,
}

/// Request payload for submitting a bulk job
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitJobRequest {
    /// Operation type (one of: inventory-sync, price-sync, bulk-import)
    #[schema(example = "inventory-sync")]
    pub operation_type: String,
    /// Target system slug (e.g. netsuite, shopify)
    #[schema(example = "shopify")]
    pub target: String,
    /// Requested chunk size; capped at the tier maximum
    #[serde(default)]
    #[schema(example = 25)]
    pub chunk_size: Option<u32>,
    /// Per-field conflict policies, e.g. {"quantity": "source-wins"}
    #[serde(default)]
    pub field_policies: Option<serde_json::Value>,
    /// Records to synchronize
    pub records: Vec<SubmitRecord>,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Unique identifier for the sync job
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Operation type
    #[schema(example = "inventory-sync")]
    pub operation_type: String,
    /// Target system slug
    #[schema(example = "shopify")]
    pub target: String,
    /// Current status of the job
    #[schema(example = "running")]
    pub status: String,
    /// Total number of records submitted
    #[schema(example = 100)]
    pub total_records: i32,
    /// Chunk size in records
    #[schema(example = 25)]
    pub chunk_size: i32,
    /// Chunks committed so far
    #[schema(example = 2)]
    pub chunks_committed: i32,
    /// Total chunks in the job
    #[schema(example = 4)]
    pub chunks_total: i32,
    /// Records written successfully
    pub succeeded_records: i32,
    /// Records with a terminal failure
    pub failed_records: i32,
    /// Records skipped as already in sync
    pub skipped_records: i32,
    /// Records held for manual review
    pub pending_records: i32,
    /// First N record-level error reasons
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<serde_json::Value>,
    /// Timestamp when the job was created
    pub created_at: String,
    /// Timestamp when the job started execution
    pub started_at: Option<String>,
    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<String>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        let chunk_size = model.chunk_size.max(1);
        let chunks_total = (model.total_records + chunk_size - 1) / chunk_size;

        Self {
            id: model.id.to_string(),
            operation_type: model.operation_type,
            target: model.target_slug,
            status: model.status,
            total_records: model.total_records,
            chunk_size: model.chunk_size,
            chunks_committed: model.checkpoint + 1,
            chunks_total,
            succeeded_records: model.succeeded_records,
            failed_records: model.failed_records,
            skipped_records: model.skipped_records,
            pending_records: model.pending_records,
            error_summary: model.error_summary,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status
    pub status: Option<String>,
    /// Filter by operation type
    pub operation_type: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u32>,
    /// Offset for pagination
    pub offset: Option<u64>,
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    /// List of jobs matching the query
    pub jobs: Vec<JobInfo>,
}

/// Record outcome information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutcomeInfo {
    /// Record identifier
    pub record_id: String,
    /// Chunk the record was processed in
    pub chunk_index: i32,
    /// Action taken (created, updated, skipped, failed, pending_review)
    pub action: String,
    /// Target field values before the write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Field values after the write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// Error detail for failed records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Retries the target write needed
    pub retry_count: i32,
    /// Timestamp when the outcome was recorded
    pub recorded_at: String,
}

impl From<record_outcome::Model> for OutcomeInfo {
    fn from(model: record_outcome::Model) -> Self {
        Self {
            record_id: model.external_id,
            chunk_index: model.chunk_index,
            action: model.action,
            before: model.before,
            after: model.after,
            error_detail: model.error_detail,
            retry_count: model.retry_count,
            recorded_at: model.recorded_at.to_rfc3339(),
        }
    }
}

/// Response payload for the outcomes listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutcomesResponse {
    pub outcomes: Vec<OutcomeInfo>,
}

/// Acknowledgement for lifecycle control requests
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobActionResponse {
    /// Job the action applies to
    pub job_id: String,
    /// Action accepted (pause, resume, cancel)
    pub action: String,
}

/// Submit a bulk synchronization job
#[utoipa::path(
    post,
    path = "/jobs",
    security(("bearer_auth" = [])),
    request_body = SubmitJobRequest,
    responses(
        (status = 201, description = "Job accepted", body = JobInfo),
        (status = 400, description = "Invalid submission", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 429, description = "Tier quota exceeded", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn submit_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(axum::http::StatusCode, Json<JobInfo>), ApiError> {
    let mut records = Vec::with_capacity(request.records.len());
    for (position, record) in request.records.into_iter().enumerate() {
        if !record.fields.is_object() {
            return Err(validation_error(
                "Invalid record fields",
                serde_json::json!({
                    "records": format!("record at position {} must have an object 'fields'", position)
                }),
            ));
        }

        let last_modified = match record.last_modified {
            Some(raw) => Some(parse_rfc3339(&raw, position)?),
            None => None,
        };

        records.push(SubmittedRecord {
            external_id: record.id,
            fields: record.fields,
            last_modified,
        });
    }

    let submission = JobSubmission {
        operation_type: request.operation_type,
        target_slug: request.target,
        chunk_size: request.chunk_size.map(|size| size as usize),
        field_policies: request.field_policies,
        records,
    };

    let job = state.engine.submit(tenant.0, submission).await?;

    Ok((axum::http::StatusCode::CREATED, Json(job.into())))
}

fn parse_rfc3339(raw: &str, position: usize) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            validation_error(
                "Invalid timestamp",
                serde_json::json!({
                    "records": format!(
                        "record at position {} has a non-RFC3339 'last_modified'",
                        position
                    )
                }),
            )
        })
}

/// List jobs for the tenant
#[utoipa::path(
    get,
    path = "/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<String>, Query, description = "Filter by job status"),
        ("operation_type" = Option<String>, Query, description = "Filter by operation type"),
        ("limit" = Option<u32>, Query, description = "Maximum number of jobs to return (default 50, max 100)"),
        ("offset" = Option<u64>, Query, description = "Offset for pagination")
    ),
    responses(
        (status = 200, description = "List of jobs for the tenant", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let limit = match params.limit {
        Some(0) => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
            ));
        }
        Some(limit) if limit > 100 => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Maximum allowed limit is 100" }),
            ));
        }
        Some(limit) => limit as u64,
        None => 50,
    };

    if let Some(status) = &params.status
        && !matches!(
            status.as_str(),
            "queued" | "running" | "paused" | "completed" | "failed" | "cancelled"
        )
    {
        return Err(validation_error(
            "Invalid status",
            serde_json::json!({
                "status": "Must be one of: queued, running, paused, completed, failed, cancelled"
            }),
        ));
    }

    let jobs = SyncJobRepository::new(state.db.clone())
        .list_by_tenant(
            tenant.0,
            params.status,
            params.operation_type,
            limit,
            params.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(JobsResponse {
        jobs: jobs.into_iter().map(JobInfo::from).collect(),
    }))
}

/// Get a job's status and progress
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job status and progress", body = JobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = find_job(&state, tenant.0, job_id).await?;
    Ok(Json(job.into()))
}

/// Pause a running job
#[utoipa::path(
    post,
    path = "/jobs/{id}/pause",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 202, description = "Pause accepted; in-flight chunks drain", body = JobActionResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is not in a pausable state", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn pause_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<(axum::http::StatusCode, Json<JobActionResponse>), ApiError> {
    state.engine.pause(tenant.0, job_id).await?;
    Ok(accepted(job_id, "pause"))
}

/// Resume a paused job from its checkpoint
#[utoipa::path(
    post,
    path = "/jobs/{id}/resume",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 202, description = "Resume accepted", body = JobActionResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is not paused", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn resume_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<(axum::http::StatusCode, Json<JobActionResponse>), ApiError> {
    state.engine.resume(tenant.0, job_id).await?;
    Ok(accepted(job_id, "resume"))
}

/// Cancel a job; in-flight chunks drain, then the job is terminal
#[utoipa::path(
    post,
    path = "/jobs/{id}/cancel",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 202, description = "Cancellation accepted", body = JobActionResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is already terminal", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<(axum::http::StatusCode, Json<JobActionResponse>), ApiError> {
    state.engine.cancel(tenant.0, job_id).await?;
    Ok(accepted(job_id, "cancel"))
}

fn accepted(
    job_id: Uuid,
    action: &str,
) -> (axum::http::StatusCode, Json<JobActionResponse>) {
    (
        axum::http::StatusCode::ACCEPTED,
        Json(JobActionResponse {
            job_id: job_id.to_string(),
            action: action.to_string(),
        }),
    )
}

/// Query parameters for listing record outcomes
#[derive(Debug, Deserialize)]
pub struct ListOutcomesQuery {
    /// Maximum number of outcomes to return (default: 100, max: 500)
    pub limit: Option<u32>,
    /// Offset for pagination
    pub offset: Option<u64>,
}

/// List a job's per-record outcomes
#[utoipa::path(
    get,
    path = "/jobs/{id}/outcomes",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ("limit" = Option<u32>, Query, description = "Maximum number of outcomes to return (default 100, max 500)"),
        ("offset" = Option<u64>, Query, description = "Offset for pagination")
    ),
    responses(
        (status = 200, description = "Record outcomes for the job", body = OutcomesResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_outcomes(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
    Query(params): Query<ListOutcomesQuery>,
) -> Result<Json<OutcomesResponse>, ApiError> {
    find_job(&state, tenant.0, job_id).await?;

    let limit = params.limit.unwrap_or(100).min(500) as u64;
    let outcomes = RecordOutcomeRepository::new(state.db.clone())
        .list_by_job(tenant.0, job_id, limit, params.offset.unwrap_or(0))
        .await?;

    Ok(Json(OutcomesResponse {
        outcomes: outcomes.into_iter().map(OutcomeInfo::from).collect(),
    }))
}

/// Subscribe to a job's progress events as server-sent events
#[utoipa::path(
    get,
    path = "/jobs/{id}/events",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "SSE stream of job events"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job has no live event stream", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_events(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    find_job(&state, tenant.0, job_id).await?;

    let receiver = state.engine.subscribe(job_id).ok_or_else(|| {
        ApiError::new(
            axum::http::StatusCode::CONFLICT,
            "CONFLICT",
            "Job has no live event stream; poll GET /jobs/{id} instead",
        )
    })?;

    let stream = BroadcastStream::new(receiver).filter_map(|event| match event {
        Ok(event) => Event::default().json_data(&event).ok().map(Ok),
        // Lagged receivers skip missed events rather than erroring the stream.
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn find_job(
    state: &AppState,
    tenant_id: Uuid,
    job_id: Uuid,
) -> Result<sync_job::Model, ApiError> {
    SyncJobRepository::new(state.db.clone())
        .find_by_tenant(tenant_id, job_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Job not found: {}", job_id),
            )
        })
}
