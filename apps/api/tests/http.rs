//! Router tests: headers, auth and error mapping over a real in-memory gateway.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use mercato_api::{router, ApiConfig, AppState, JwtManager};
use mercato_core::{Actor, Role, StoreScope};
use mercato_db::{Database, DbConfig, Store};
use mercato_engine::{EngineConfig, MutationGateway};

struct Harness {
    app: Router,
    token: String,
}

async fn harness() -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let now = Utc::now();
    let mut uow = db.begin().await.unwrap();
    uow.tenancy().insert_tenant("acme", "Acme", now).await.unwrap();
    for id in ["north", "south"] {
        uow.tenancy()
            .insert_store(&Store {
                id: id.to_string(),
                tenant_id: "acme".to_string(),
                name: id.to_string(),
                utc_offset_minutes: 0,
                created_at: now,
            })
            .await
            .unwrap();
    }
    uow.commit().await.unwrap();

    let config = ApiConfig::default();
    let state = AppState::new(MutationGateway::new(db, EngineConfig::default()), &config);
    let token = JwtManager::new(config.auth.jwt_secret.clone(), 3600)
        .issue(&Actor {
            user_id: "manager-1".into(),
            tenant_id: "acme".into(),
            role: Role::Manager,
            store_scope: StoreScope::All,
        })
        .unwrap();
    Harness {
        app: router(state),
        token,
    }
}

impl Harness {
    fn post(&self, uri: &str, key: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.token))
            .header("x-tenant-id", "acme")
            .header("idempotency-key", key)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let replay = response
            .headers()
            .get("x-idempotency-result")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, replay, body)
    }
}

fn open_session(tx: &str) -> Value {
    json!({ "transaction_id": tx, "store_id": "north", "opening_amount": 10000 })
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let h = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/cash/sessions")
        .header("x-tenant-id", "acme")
        .header("idempotency-key", "k-1")
        .body(Body::from(open_session("tx-1").to_string()))
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_tenant_header_must_match_token() {
    let h = harness().await;
    let mut request = h.post("/v1/cash/sessions", "k-1", open_session("tx-1"));
    request
        .headers_mut()
        .insert("x-tenant-id", "globex".parse().unwrap());
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "CROSS_TENANT_ACCESS_DENIED");
}

#[tokio::test]
async fn test_replay_is_flagged_in_header() {
    let h = harness().await;
    let (status, replay, first) = h
        .send(h.post("/v1/cash/sessions", "open-1", open_session("tx-1")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(replay.is_none());
    assert_eq!(first["transaction_id"], "tx-1");
    assert_eq!(first["data"]["status"], "OPEN");

    let (status, replay, second) = h
        .send(h.post("/v1/cash/sessions", "open-1", open_session("tx-1")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(replay.as_deref(), Some("IDEMPOTENCY_REPLAY"));
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_changed_body_under_same_key_is_409() {
    let h = harness().await;
    h.send(h.post("/v1/cash/sessions", "open-1", open_session("tx-1")))
        .await;
    let (status, _, body) = h
        .send(h.post("/v1/cash/sessions", "open-1", open_session("tx-2")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD");
}

#[tokio::test]
async fn test_missing_transaction_id_is_422() {
    let h = harness().await;
    let body = json!({ "store_id": "north", "opening_amount": 0 });
    let (status, _, body) = h.send(h.post("/v1/cash/sessions", "k-1", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["reason_code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_path_ids_feed_the_command() {
    let h = harness().await;
    let (_, _, opened) = h
        .send(h.post("/v1/cash/sessions", "open-1", open_session("tx-1")))
        .await;
    let session_id = opened["data"]["id"].as_str().unwrap();

    let (status, _, body) = h
        .send(h.post(
            &format!("/v1/cash/sessions/{session_id}/cash-out"),
            "out-1",
            json!({ "transaction_id": "tx-2", "amount": 20000 }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reason_code"], "NEGATIVE_CASH");
    assert!(body["trace_id"].is_string());
}

#[tokio::test]
async fn test_unknown_count_action_is_404() {
    let h = harness().await;
    let (status, _, body) = h
        .send(h.post(
            "/v1/inventory-counts/ic-1/explode",
            "k-1",
            json!({ "transaction_id": "tx-1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_stock_levels_after_import() {
    let h = harness().await;
    let (status, _, _) = h
        .send(h.post(
            "/v1/stock/import",
            "import-1",
            json!({
                "transaction_id": "tx-1",
                "store_id": "north",
                "items": [{ "sku": "SKU-1", "qty": 3 }]
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/v1/stock/levels?location_id=north")
        .header("authorization", format!("Bearer {}", h.token))
        .header("x-tenant-id", "acme")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["sku"], "SKU-1");
    assert_eq!(body["data"][0]["pending"], 3);
    assert_eq!(body["data"][0]["total"], 3);
}

fn trace_header(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_replay_carries_original_trace_id() {
    let h = harness().await;
    let mut first = h.post("/v1/cash/sessions", "open-1", open_session("tx-1"));
    first.headers_mut().insert("x-trace-id", "trace-first".parse().unwrap());
    let response = h.app.clone().oneshot(first).await.unwrap();
    assert_eq!(trace_header(&response).as_deref(), Some("trace-first"));

    let mut retry = h.post("/v1/cash/sessions", "open-1", open_session("tx-1"));
    retry.headers_mut().insert("x-trace-id", "trace-retry".parse().unwrap());
    let response = h.app.clone().oneshot(retry).await.unwrap();
    assert_eq!(trace_header(&response).as_deref(), Some("trace-first"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["trace_id"], "trace-first");
}

#[tokio::test]
async fn test_request_errors_echo_callers_trace_id() {
    let h = harness().await;
    let mut request = h.post(
        "/v1/cash/sessions",
        "k-1",
        json!({ "store_id": "north", "opening_amount": 0 }),
    );
    request.headers_mut().insert("x-trace-id", "trace-422".parse().unwrap());
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(trace_header(&response).as_deref(), Some("trace-422"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["trace_id"], "trace-422");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/cash/sessions")
        .header("x-tenant-id", "acme")
        .header("x-trace-id", "trace-401")
        .header("idempotency-key", "k-2")
        .body(Body::from(open_session("tx-2").to_string()))
        .unwrap();
    let (status, _, body) = h.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["trace_id"], "trace-401");
}
