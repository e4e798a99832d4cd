//! # Reviews API Handlers
//!
//! Handlers for the manual-review surface: listing a job's field-level
//! conflicts and resolving one with a chosen value. Resolving the last open
//! item lets a draining job complete.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension};
use crate::error::{ApiError, validation_error};
use crate::models::review_item;
use crate::repositories::ReviewItemRepository;
use crate::server::AppState;

/// Review item information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewItemInfo {
    /// Unique identifier for the review item
    pub id: String,
    /// Job the conflict surfaced in
    pub job_id: String,
    /// Record identifier
    pub record_id: String,
    /// Field the source and target disagree on
    pub field: String,
    /// Value reported by the source system
    pub source_value: serde_json::Value,
    /// Value held by the target system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_value: Option<serde_json::Value>,
    /// Review status (open, resolved)
    pub status: String,
    /// Value chosen by the reviewer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_value: Option<serde_json::Value>,
    /// Timestamp when the conflict was surfaced
    pub created_at: String,
    /// Timestamp when the reviewer resolved the item
    pub resolved_at: Option<String>,
}

impl From<review_item::Model> for ReviewItemInfo {
    fn from(model: review_item::Model) -> Self {
        Self {
            id: model.id.to_string(),
            job_id: model.job_id.to_string(),
            record_id: model.external_id,
            field: model.field,
            source_value: model.source_value,
            target_value: model.target_value,
            status: model.status,
            chosen_value: model.chosen_value,
            created_at: model.created_at.to_rfc3339(),
            resolved_at: model.resolved_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Query parameters for listing review items
#[derive(Debug, Deserialize)]
pub struct ListReviewsQuery {
    /// Filter by review status (open, resolved)
    pub status: Option<String>,
}

/// Response payload for the review listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewsResponse {
    pub reviews: Vec<ReviewItemInfo>,
}

/// Request payload for resolving a review item
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveReviewRequest {
    /// The value the reviewer chose for the field
    pub chosen_value: serde_json::Value,
}

/// List a job's manual-review items
#[utoipa::path(
    get,
    path = "/jobs/{id}/reviews",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ("status" = Option<String>, Query, description = "Filter by review status (open, resolved)")
    ),
    responses(
        (status = 200, description = "Review items for the job", body = ReviewsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "reviews"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
    Query(params): Query<ListReviewsQuery>,
) -> Result<Json<ReviewsResponse>, ApiError> {
    if let Some(status) = &params.status
        && !matches!(status.as_str(), "open" | "resolved")
    {
        return Err(validation_error(
            "Invalid status",
            serde_json::json!({ "status": "Must be one of: open, resolved" }),
        ));
    }

    let items = ReviewItemRepository::new(state.db.clone())
        .list_by_job(tenant.0, job_id, params.status)
        .await?;

    Ok(Json(ReviewsResponse {
        reviews: items.into_iter().map(ReviewItemInfo::from).collect(),
    }))
}

/// Resolve a review item with a chosen value
#[utoipa::path(
    post,
    path = "/reviews/{id}/resolve",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Review item ID")),
    request_body = ResolveReviewRequest,
    responses(
        (status = 200, description = "Review item resolved", body = ReviewItemInfo),
        (status = 400, description = "Item is not open", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Review item not found", body = ApiError)
    ),
    tag = "reviews"
)]
pub async fn resolve_review(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(item_id): Path<Uuid>,
    Json(request): Json<ResolveReviewRequest>,
) -> Result<Json<ReviewItemInfo>, ApiError> {
    let repo = ReviewItemRepository::new(state.db.clone());
    let resolved = repo
        .resolve(tenant.0, item_id, request.chosen_value)
        .await?;

    // Let the engine drop the pending counter and complete the job when
    // this was the last open item.
    state
        .engine
        .review_resolved(tenant.0, resolved.job_id, &resolved.external_id)
        .await?;

    Ok(Json(resolved.into()))
}
