//! HTTP surface tests: the router is driven with `oneshot` over an
//! in-memory store, no socket involved.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use approvals::config::Config;
use approvals::models::live::{NewTimeLog, UserRecord};
use approvals::store::{ChangeStore, MemoryStore};
use approvals::{build_app, AppState};

const KEY: &str = "test-service-key";

async fn app() -> (Router, i64) {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_user(&UserRecord {
            id: 1,
            username: "ana".into(),
            full_name: "Ana Admin".into(),
            role: "admin".into(),
            is_active: true,
        })
        .await
        .unwrap();
    let log = store
        .insert_time_log(&NewTimeLog {
            user_id: 7,
            project_id: 3,
            page_id: None,
            environment_id: None,
            issue_id: None,
            phase_id: None,
            generic_category_id: None,
            task_type: "other".into(),
            testing_type: None,
            log_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            hours_spent: rust_decimal::Decimal::from(8),
            description: "first pass".into(),
            is_utilized: true,
        })
        .await
        .unwrap();

    let config = Config {
        service_key: KEY.into(),
        ..Config::default()
    };
    let state = Arc::new(AppState::new(store, config).unwrap());
    (build_app(state), log.id)
}

fn call(method: &str, uri: &str, user: Option<(i64, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-service-key", KEY);
    if let Some((id, role)) = user {
        builder = builder
            .header("x-user-id", id.to_string())
            .header("x-user-role", role);
    }
    match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_probes_and_request_id() {
    let (app, _) = app().await;

    let resp = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));

    let resp = app
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_wrong_service_key_is_unauthorized() {
    let (app, _) = app().await;

    let resp = app
        .clone()
        .oneshot(Request::get("/api/v1/approvals").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    let resp = app
        .oneshot(
            Request::get("/api/v1/approvals")
                .header("authorization", "Bearer not-the-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_review_and_approve_over_http() {
    let (app, log_id) = app().await;
    let submit = json!({
        "date": "2024-03-01",
        "change": {"kind": "log_edit", "log_id": log_id, "patch": {"hours_spent": 6.5}},
        "reason": "typo in hours"
    });

    let resp = app
        .clone()
        .oneshot(call("POST", "/api/v1/edit-requests", Some((7, "qa")), Some(submit.clone())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let staged = json_body(resp).await;
    let request_id = staged["request_id"].as_str().unwrap().to_string();
    assert_eq!(staged["change"]["kind"], "log_edit");

    // Same log again while the first is unresolved.
    let resp = app
        .clone()
        .oneshot(call("POST", "/api/v1/edit-requests", Some((7, "qa")), Some(submit)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(resp).await["error"]["code"], "duplicate_pending");

    let resp = app
        .clone()
        .oneshot(call("GET", "/api/v1/edit-requests/mine?date=2024-03-01", Some((7, "qa")), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mine = json_body(resp).await;
    assert_eq!(mine["pending"].as_array().unwrap().len(), 1);
    assert_eq!(mine["edit_request"], "pending");
    assert_eq!(mine["delete_request"], Value::Null);

    let resp = app
        .clone()
        .oneshot(call("GET", "/api/v1/approvals", Some((1, "admin")), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);

    let diff_uri = format!("/api/v1/approvals/{}/diff", request_id);
    let resp = app
        .clone()
        .oneshot(call("GET", &diff_uri, Some((1, "admin")), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let diff = json_body(resp).await;
    assert_eq!(diff["entries"][0]["current"]["kind"], "log");

    let decide_uri = format!("/api/v1/approvals/{}/decision", request_id);
    let resp = app
        .clone()
        .oneshot(call(
            "POST",
            &decide_uri,
            Some((7, "qa")),
            Some(json!({"decision": "approve"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app
        .clone()
        .oneshot(call(
            "POST",
            &decide_uri,
            Some((1, "admin")),
            Some(json!({"decision": "approve", "note": "fine"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let decided = json_body(resp).await;
    assert_eq!(decided["request"]["status"], "approved");
    assert_eq!(decided["mutations"], 1);

    let resp = app
        .clone()
        .oneshot(call(
            "POST",
            &decide_uri,
            Some((1, "admin")),
            Some(json!({"decision": "reject"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(resp).await["error"]["code"], "already_decided");

    let resp = app
        .clone()
        .oneshot(call("GET", "/api/v1/notifications/unread", Some((7, "qa")), None))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["count"], 1);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("qadesk_submissions_total"));
    assert!(text.contains("qadesk_decisions_total"));
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let (app, _) = app().await;

    let resp = app
        .clone()
        .oneshot(call(
            "POST",
            "/api/v1/edit-requests",
            Some((7, "qa")),
            Some(json!({
                "date": "2024-03-01",
                "change": {"kind": "status_change", "status": "vacationing"}
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"]["code"], "validation_failed");

    let resp = app
        .clone()
        .oneshot(call(
            "POST",
            "/api/v1/edit-requests",
            Some((7, "qa")),
            Some(json!({
                "date": "2024-03-01",
                "change": {"kind": "log_edit", "log_id": 1, "patch": {"user_id": 2}}
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Missing identity headers.
    let resp = app
        .clone()
        .oneshot(call("GET", "/api/v1/notifications", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(call(
            "POST",
            "/api/v1/approvals/decisions",
            Some((1, "admin")),
            Some(json!({"ids": [], "decision": "approve"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (app, _) = app().await;
    let uri = format!("/api/v1/approvals/{}/diff", uuid::Uuid::new_v4());
    let resp = app
        .clone()
        .oneshot(call("GET", &uri, Some((1, "admin")), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(call("GET", "/api/v1/approvals/not-a-uuid/diff", Some((1, "admin")), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
