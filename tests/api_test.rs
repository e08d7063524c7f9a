// Integration tests for the HTTP API
//
// The router is wired to the real drivers: CrateDB and Orion are mockito
// servers, the document store is a SQLite file in a temp directory.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use etl_service::api::{create_router, AppState};
use etl_service::broker::{OrionClient, ReconcileService, Reconciler};
use etl_service::pipeline::EtlPipeline;
use etl_service::retry::RetryPolicy;
use etl_service::scheduler::StatusRegistry;
use etl_service::sink::SqliteDocumentStore;
use etl_service::source::CrateSource;
use etl_service::stream::{DesiredState, StreamKind};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Test app ──────────────────────────────────────────────────────────────────

struct TestApp {
    router: Router,
    crate_db: ServerGuard,
    orion: ServerGuard,
    _dir: TempDir,
}

async fn test_app(gateway_token: Option<&str>) -> TestApp {
    let crate_db = Server::new_async().await;
    let orion = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    let source = Arc::new(CrateSource::new(crate_db.url(), Duration::from_secs(5)).unwrap());
    let sink = Arc::new(SqliteDocumentStore::new(dir.path().join("docs.db")).unwrap());
    let broker = Arc::new(
        OrionClient::new(
            orion.url(),
            "smart".to_string(),
            "/".to_string(),
            Duration::from_secs(5),
            Duration::from_secs(2),
        )
        .unwrap(),
    );

    let pipelines: HashMap<StreamKind, Arc<EtlPipeline>> = StreamKind::ALL
        .into_iter()
        .map(|s| (s, Arc::new(EtlPipeline::new(s, source.clone(), sink.clone()))))
        .collect();
    let reconcile = Arc::new(ReconcileService::new(
        Reconciler::new(broker, RetryPolicy::new(2, Duration::from_millis(10))),
        DesiredState::for_streams(&StreamKind::ALL, "http://quantumleap:8668/v2/notify"),
    ));

    let state = Arc::new(AppState {
        sink,
        pipelines,
        statuses: StatusRegistry::new(),
        reconcile,
        gateway_token: gateway_token.map(|t| t.to_string()),
    });

    TestApp {
        router: create_router(state),
        crate_db,
        orion,
        _dir: dir,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    let request = match body {
        Some(b) => request.body(Body::from(b.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn mock_latest_row(app: &mut TestApp, entity_id: &str, body: &str) -> mockito::Mock {
    app.crate_db
        .mock("POST", "/_sql")
        .match_body(Matcher::PartialJson(json!({ "args": [entity_id] })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

async fn mock_orion_alive(app: &mut TestApp) -> mockito::Mock {
    app.orion
        .mock("GET", "/version")
        .with_status(200)
        .with_body(r#"{"orion":{"version":"3.10.1"}}"#)
        .create_async()
        .await
}

// ── Results ───────────────────────────────────────────────────────────────────

/// GET /etl lists every stream's endpoints
#[tokio::test]
async fn test_service_index() {
    let app = test_app(None).await;

    let (status, body) = send(&app, "GET", "/etl", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["irrigation"]["history"], "/irrigation/history");
    assert_eq!(body["services"]["gps"]["collection"], "location_history");
}

/// GET /{stream} before any run → 404
#[tokio::test]
async fn test_latest_before_any_run_returns_404() {
    let app = test_app(None).await;

    let (status, body) = send(&app, "GET", "/irrigation", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("irrigation"));
}

/// Unknown stream has no route
#[tokio::test]
async fn test_unknown_stream_returns_404() {
    let app = test_app(None).await;

    let (status, _) = send(&app, "GET", "/humidity", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// POST /irrigation/run-etl reads CrateDB, stores the KPI, serves it back
#[tokio::test]
async fn test_manual_run_then_read_back() {
    let mut app = test_app(None).await;
    let mock = mock_latest_row(
        &mut app,
        "sensor001",
        r#"{"cols":["time_index","temperatura","humedad"],"rows":[[1700000000000,22.0,30.0]],"rowcount":1}"#,
    )
    .await;

    let (status, run) = send(&app, "POST", "/irrigation/run-etl", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["stream"], "irrigation");
    assert_eq!(run["status"], "succeeded");
    let record_id = run["record_id"].as_str().unwrap().to_string();

    let (status, latest) = send(&app, "GET", "/irrigation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], record_id);
    assert_eq!(latest["decision"]["action"], "normal_irrigation");
    assert_eq!(latest["decision"]["level"], 3);
    assert_eq!(latest["raw_values"]["humedad"], 30.0);
    assert_eq!(latest["stored"], true);

    let (status, history) = send(&app, "GET", "/irrigation/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);

    mock.assert_async().await;
}

/// GPS table not created yet → skipped, nothing stored
#[tokio::test]
async fn test_manual_run_with_unknown_table_is_skipped() {
    let mut app = test_app(None).await;
    app.crate_db
        .mock("POST", "/_sql")
        .with_status(404)
        .with_body(r#"{"error":{"message":"RelationUnknown[Relation 'etsensorgps' unknown]","code":4041}}"#)
        .create_async()
        .await;

    let (status, run) = send(&app, "POST", "/gps/run-etl", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "skipped");
    assert_eq!(run["reason"], "no_data");

    let (status, _) = send(&app, "GET", "/gps", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// CrateDB query error → 500 with the failed stage, visible in /subscriptions/status
#[tokio::test]
async fn test_failed_run_is_reported() {
    let mut app = test_app(None).await;
    app.crate_db
        .mock("POST", "/_sql")
        .with_status(400)
        .with_body(r#"{"error":{"message":"SQLParseException","code":4000}}"#)
        .create_async()
        .await;

    let (status, run) = send(&app, "POST", "/gps/run-etl", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(run["status"], "failed");
    assert_eq!(run["stage"], "extract");

    let (_, status_body) = send(&app, "GET", "/subscriptions/status", None).await;
    assert_eq!(status_body["pipelines"]["gps"]["failure_count"], 1);
    assert_eq!(status_body["reconcile"], Value::Null);
}

// ── Management ────────────────────────────────────────────────────────────────

/// POST /subscriptions/recreate on an empty broker → 200, everything created
#[tokio::test]
async fn test_recreate_creates_everything() {
    let mut app = test_app(None).await;
    mock_orion_alive(&mut app).await;
    let subs = app
        .orion
        .mock("POST", "/v2/subscriptions")
        .with_status(201)
        .with_header("location", "/v2/subscriptions/abc123")
        .expect(2)
        .create_async()
        .await;
    let entities = app
        .orion
        .mock("POST", "/v2/entities")
        .with_status(201)
        .expect(2)
        .create_async()
        .await;

    let (status, body) = send(&app, "POST", "/subscriptions/recreate", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["report"]["items"].as_array().unwrap().len(), 4);
    subs.assert_async().await;
    entities.assert_async().await;

    let (_, status_body) = send(&app, "GET", "/subscriptions/status", None).await;
    assert_eq!(status_body["reconcile"]["state"], "completed");
}

/// Existing subscription with a different description → 207
#[tokio::test]
async fn test_recreate_with_ambiguous_conflict_is_partial() {
    let mut app = test_app(None).await;
    mock_orion_alive(&mut app).await;
    app.orion
        .mock("POST", "/v2/subscriptions")
        .with_status(422)
        .with_body(r#"{"error":"Unprocessable","description":"Already exists"}"#)
        .create_async()
        .await;
    app.orion
        .mock("GET", "/v2/subscriptions")
        .with_status(200)
        .with_body(r#"[{"id":"x1","description":"Some other subscription"}]"#)
        .create_async()
        .await;
    app.orion
        .mock("POST", "/v2/entities")
        .with_status(201)
        .create_async()
        .await;

    let (status, body) = send(&app, "POST", "/subscriptions/recreate", None).await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["status"], "partial_success");
    assert_eq!(body["report"]["items"][0]["outcome"], "failed");
    assert_eq!(body["report"]["items"][0]["failure"]["reason"], "ambiguous_conflict");
}

/// Broker never answers /version → 503
#[tokio::test]
async fn test_recreate_with_broker_down_returns_503() {
    let mut app = test_app(None).await;
    app.orion
        .mock("GET", "/version")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let (status, body) = send(&app, "POST", "/subscriptions/recreate", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");

    let (_, status_body) = send(&app, "GET", "/subscriptions/status", None).await;
    assert_eq!(status_body["reconcile"]["state"], "broker_unavailable");
}

/// GET /subscriptions lists what the broker holds
#[tokio::test]
async fn test_list_subscriptions() {
    let mut app = test_app(None).await;
    app.orion
        .mock("GET", "/v2/subscriptions")
        .match_header("fiware-service", "smart")
        .with_status(200)
        .with_body(r#"[{"id":"a1","description":"Notify GPS sensor","status":"active"}]"#)
        .create_async()
        .await;

    let (status, body) = send(&app, "GET", "/subscriptions", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["subscriptions"][0]["status"], "active");
}

/// GET /subscriptions/health compares active and expected counts
#[tokio::test]
async fn test_health_reports_missing_subscription() {
    let mut app = test_app(None).await;
    mock_orion_alive(&mut app).await;
    app.orion
        .mock("GET", "/v2/subscriptions")
        .with_status(200)
        .with_body(r#"[{"id":"a1","description":"Notify GPS sensor"}]"#)
        .create_async()
        .await;
    app.orion
        .mock("GET", "/v2/entities")
        .with_status(200)
        .with_body(r#"[{"id":"sensor001","type":"sensorTempHum"},{"id":"sensor002","type":"sensorGPS"}]"#)
        .create_async()
        .await;

    let (status, body) = send(&app, "GET", "/subscriptions/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_subscriptions"], 1);
    assert_eq!(body["expected_subscriptions"], 2);
    assert_eq!(
        body["missing_subscriptions"],
        json!(["Notify temperature and humidity sensor"])
    );
    assert_eq!(body["active_entities"], 2);
}

/// GET /subscriptions/entities/:id → 404 when the broker has no such entity
#[tokio::test]
async fn test_get_missing_entity_returns_404() {
    let mut app = test_app(None).await;
    app.orion
        .mock("GET", "/v2/entities/sensor009")
        .with_status(404)
        .with_body(r#"{"error":"NotFound","description":"The requested entity has not been found."}"#)
        .create_async()
        .await;

    let (status, _) = send(&app, "GET", "/subscriptions/entities/sensor009", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// POST /subscriptions/entities/setup only touches entities
#[tokio::test]
async fn test_entity_setup_skips_subscriptions() {
    let mut app = test_app(None).await;
    mock_orion_alive(&mut app).await;
    let subs = app
        .orion
        .mock("POST", "/v2/subscriptions")
        .expect(0)
        .create_async()
        .await;
    app.orion
        .mock("POST", "/v2/entities")
        .with_status(201)
        .expect(2)
        .create_async()
        .await;

    let (status, body) = send(&app, "POST", "/subscriptions/entities/setup", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["items"][1]["key"], "sensor002");
    subs.assert_async().await;
}

/// Encoded `?` in the id → 400, nothing sent to the broker
#[tokio::test]
async fn test_get_entity_with_unsafe_id_returns_400() {
    let mut app = test_app(None).await;
    let lookup = app
        .orion
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (status, body) = send(
        &app,
        "GET",
        "/subscriptions/entities/sensor001%3Ftype=sensorGPS",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid entity id"));
    lookup.assert_async().await;
}

/// GET /subscriptions/debug lists both tenants side by side
#[tokio::test]
async fn test_debug_shows_both_tenants() {
    let mut app = test_app(None).await;
    mock_orion_alive(&mut app).await;
    app.orion
        .mock("GET", "/v2/subscriptions")
        .match_header("fiware-service", "smart")
        .with_status(200)
        .with_body(r#"[{"id":"a1","description":"Notify GPS sensor"}]"#)
        .create_async()
        .await;
    app.orion
        .mock("GET", "/v2/subscriptions")
        .match_header("fiware-service", Matcher::Missing)
        .with_status(200)
        .with_body(r#"[{"id":"b1","description":"Created without headers"},{"id":"b2"}]"#)
        .create_async()
        .await;
    app.orion
        .mock("GET", "/v2/entities")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let (status, body) = send(&app, "GET", "/subscriptions/debug", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["broker_connected"], true);
    assert_eq!(body["broker_version"]["orion"]["version"], "3.10.1");
    assert_eq!(body["tenant_subscriptions"]["count"], 1);
    assert_eq!(body["default_tenant_subscriptions"]["count"], 2);
    assert_eq!(body["entities"]["count"], 0);
    assert!(body["entities"]["error"].as_str().unwrap().contains("500"));
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Without a token the gateway is not mounted
#[tokio::test]
async fn test_gateway_disabled_without_token() {
    let app = test_app(None).await;

    let (status, _) = send(
        &app,
        "POST",
        "/gateway/sensor001",
        Some(json!({"token": "anything"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Wrong token → 401, broker untouched
#[tokio::test]
async fn test_gateway_rejects_wrong_token() {
    let mut app = test_app(Some("secreto")).await;
    let patch = app
        .orion
        .mock("PATCH", "/v2/entities/sensor001/attrs")
        .expect(0)
        .create_async()
        .await;

    let (status, _) = send(
        &app,
        "POST",
        "/gateway/sensor001",
        Some(json!({"token": "wrong", "temperatura": {"value": 20.0, "type": "float"}})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    patch.assert_async().await;
}

/// Non-object body → 400
#[tokio::test]
async fn test_gateway_rejects_non_object() {
    let app = test_app(Some("secreto")).await;

    let (status, _) = send(&app, "POST", "/gateway/sensor001", Some(json!([1, 2, 3]))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Valid reading is forwarded without the token
#[tokio::test]
async fn test_gateway_forwards_reading() {
    let mut app = test_app(Some("secreto")).await;
    let patch = app
        .orion
        .mock("PATCH", "/v2/entities/sensor001/attrs")
        .match_header("fiware-service", "smart")
        .match_body(Matcher::Json(
            json!({"temperatura": {"value": 20.5, "type": "float"}}),
        ))
        .with_status(204)
        .create_async()
        .await;

    let (status, _) = send(
        &app,
        "POST",
        "/gateway/sensor001",
        Some(json!({"token": "secreto", "temperatura": {"value": 20.5, "type": "float"}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    patch.assert_async().await;
}

/// Broker failure → 202, reading accepted but not forwarded
#[tokio::test]
async fn test_gateway_broker_failure_returns_202() {
    let mut app = test_app(Some("secreto")).await;
    app.orion
        .mock("PATCH", "/v2/entities/sensor002/attrs")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let (status, body) = send(
        &app,
        "POST",
        "/gateway/sensor002",
        Some(json!({"token": "secreto", "latitud": {"value": 6.2, "type": "float"}})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["error"].as_str().unwrap().contains("500"));
}
