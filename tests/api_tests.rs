//! Integration tests for the HTTP surface
//!
//! Exercises the full stack: auth middleware, job submission, progress
//! polling, and tenant isolation, with target writes served by a mock HTTP
//! server.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use tokio::time::sleep;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use channelsync::adapters::{AdapterRegistry, ShopifyAdapter};
use channelsync::config::AppConfig;
use channelsync::db::init_pool;
use channelsync::engine::SyncEngine;
use channelsync::migration::{Migrator, MigratorTrait};
use channelsync::repositories::TenantRepository;
use channelsync::server::{AppState, create_app};

const TOKEN: &str = "test-operator-token";

struct TestApp {
    app: Router,
    db: DatabaseConnection,
    _server: MockServer,
}

async fn test_app() -> TestApp {
    // Target that knows no records and accepts every write.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"product": {}})))
        .mount(&server)
        .await;

    let mut config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        operator_tokens: vec![TOKEN.to_string()],
        ..Default::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.rate_gate.window_seconds = 60;
    config.shopify_api_base = Some(server.uri());
    config.shopify_token = Some("shpat_test".to_string());

    let db = init_pool(&config).await.expect("Failed to init test DB");
    Migrator::up(&db, None).await.expect("Failed to run migrations");

    let mut registry = AdapterRegistry::new();
    registry.register(std::sync::Arc::new(
        ShopifyAdapter::new(&server.uri(), "shpat_test".to_string()).unwrap(),
    ));

    let config = Arc::new(config);
    let engine = SyncEngine::new(db.clone(), config.clone(), registry);
    let state = AppState {
        db: db.clone(),
        config,
        engine,
    };

    TestApp {
        app: create_app(state),
        db,
        _server: server,
    }
}

async fn create_tenant(db: &DatabaseConnection, tier: &str) -> Uuid {
    let tenant_id = Uuid::new_v4();
    TenantRepository::new(db.clone())
        .create(tenant_id, Some("Test Tenant".to_string()), tier)
        .await
        .expect("Failed to create tenant");
    tenant_id
}

fn submit_body(record_count: usize) -> Value {
    let records: Vec<Value> = (0..record_count)
        .map(|i| json!({"id": format!("sku-{}", i), "fields": {"quantity": 7}}))
        .collect();

    json!({
        "operation_type": "inventory-sync",
        "target": "shopify",
        "chunk_size": 10,
        "field_policies": {"quantity": "source-wins"},
        "records": records
    })
}

fn authed(request: axum::http::request::Builder, tenant_id: Uuid) -> axum::http::request::Builder {
    request
        .header("Authorization", format!("Bearer {}", TOKEN))
        .header("X-Tenant-Id", tenant_id.to_string())
        .header("Content-Type", "application/json")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submission_requires_bearer_auth() {
    let t = test_app().await;
    let tenant_id = create_tenant(&t.db, "scale").await;

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("X-Tenant-Id", tenant_id.to_string())
        .header("Content-Type", "application/json")
        .body(Body::from(submit_body(1).to_string()))
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn starter_tier_oversized_job_returns_quota_exceeded() {
    let t = test_app().await;
    let tenant_id = create_tenant(&t.db, "starter").await;

    let request = authed(Request::builder().method("POST").uri("/jobs"), tenant_id)
        .body(Body::from(submit_body(150).to_string()))
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(body["code"], "QUOTA_EXCEEDED");
}

#[tokio::test]
async fn submitted_job_runs_to_completion() {
    let t = test_app().await;
    let tenant_id = create_tenant(&t.db, "scale").await;

    let request = authed(Request::builder().method("POST").uri("/jobs"), tenant_id)
        .body(Body::from(submit_body(15).to_string()))
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let job = body_json(response).await;
    let job_id = job["id"].as_str().unwrap().to_string();
    assert_eq!(job["status"], "queued");
    assert_eq!(job["chunks_total"], 2);

    // Poll until the engine drives the job to a terminal status.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let done = loop {
        let request = authed(
            Request::builder()
                .method("GET")
                .uri(format!("/jobs/{}", job_id)),
            tenant_id,
        )
        .body(Body::empty())
        .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        if body["status"] == "completed" {
            break body;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job stuck in status {}",
            body["status"]
        );
        sleep(Duration::from_millis(25)).await;
    };

    assert_eq!(done["succeeded_records"], 15);
    assert_eq!(done["failed_records"], 0);
    assert_eq!(done["chunks_committed"], 2);

    // The audit trail has one outcome per record.
    let request = authed(
        Request::builder()
            .method("GET")
            .uri(format!("/jobs/{}/outcomes", job_id)),
        tenant_id,
    )
    .body(Body::empty())
    .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let outcomes = body_json(response).await;
    assert_eq!(outcomes["outcomes"].as_array().unwrap().len(), 15);
}

#[tokio::test]
async fn jobs_are_tenant_isolated() {
    let t = test_app().await;
    let owner = create_tenant(&t.db, "scale").await;
    let other = create_tenant(&t.db, "scale").await;

    let request = authed(Request::builder().method("POST").uri("/jobs"), owner)
        .body(Body::from(submit_body(1).to_string()))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = body_json(response).await;
    let job_id = job["id"].as_str().unwrap().to_string();

    // Another tenant cannot see the job.
    let request = authed(
        Request::builder()
            .method("GET")
            .uri(format!("/jobs/{}", job_id)),
        other,
    )
    .body(Body::empty())
    .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_submission_shapes_are_rejected() {
    let t = test_app().await;
    let tenant_id = create_tenant(&t.db, "scale").await;

    // Unknown operation type.
    let mut body = submit_body(1);
    body["operation_type"] = json!("teleport");
    let request = authed(Request::builder().method("POST").uri("/jobs"), tenant_id)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Records with non-object fields.
    let mut body = submit_body(1);
    body["records"] = json!([{"id": "sku-0", "fields": "not-an-object"}]);
    let request = authed(Request::builder().method("POST").uri("/jobs"), tenant_id)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
