//! # Server Configuration
//!
//! This module contains the server setup and configuration for the
//! channelsync service: shared state, router assembly, and the OpenAPI
//! document.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::adapters::AdapterRegistry;
use crate::auth;
use crate::config::AppConfig;
use crate::engine::SyncEngine;
use crate::handlers;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub engine: SyncEngine,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/jobs",
            post(handlers::jobs::submit_job).get(handlers::jobs::list_jobs),
        )
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/pause", post(handlers::jobs::pause_job))
        .route("/jobs/{id}/resume", post(handlers::jobs::resume_job))
        .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        .route("/jobs/{id}/outcomes", get(handlers::jobs::list_outcomes))
        .route("/jobs/{id}/events", get(handlers::jobs::job_events))
        .route("/jobs/{id}/reviews", get(handlers::reviews::list_reviews))
        .route(
            "/reviews/{id}/resolve",
            post(handlers::reviews::resolve_review),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health::healthz))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let registry = AdapterRegistry::from_config(&config);
    let engine = SyncEngine::new(db.clone(), config.clone(), registry);

    // Re-drive jobs interrupted by the last shutdown before accepting new
    // submissions.
    let resumed = engine.resume_interrupted().await?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed interrupted jobs from checkpoints");
    }

    let state = AppState {
        db,
        config: config.clone(),
        engine,
    };
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::healthz,
        crate::handlers::jobs::submit_job,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::pause_job,
        crate::handlers::jobs::resume_job,
        crate::handlers::jobs::cancel_job,
        crate::handlers::jobs::list_outcomes,
        crate::handlers::jobs::job_events,
        crate::handlers::reviews::list_reviews,
        crate::handlers::reviews::resolve_review,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::health::HealthResponse,
            crate::handlers::jobs::SubmitJobRequest,
            crate::handlers::jobs::SubmitRecord,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::JobActionResponse,
            crate::handlers::jobs::OutcomeInfo,
            crate::handlers::jobs::OutcomesResponse,
            crate::handlers::reviews::ReviewItemInfo,
            crate::handlers::reviews::ReviewsResponse,
            crate::handlers::reviews::ResolveReviewRequest,
        )
    ),
    info(
        title = "channelsync API",
        description = "Multi-system inventory and pricing synchronization engine",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
