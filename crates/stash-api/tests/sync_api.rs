use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stash_api::{app_router, AppConfig, AppState, DocumentStore};
use tower::ServiceExt;

async fn test_app(config: AppConfig) -> (Router, Arc<DocumentStore>) {
    let store = Arc::new(DocumentStore::open_in_memory().await.unwrap());
    let state = AppState::new(Arc::new(config), Arc::clone(&store));
    (app_router(state), store)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn push(app: &Router, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, "/sync/push", Some(body)).await
}

async fn pull(app: &Router, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, "/sync/pull", Some(body)).await
}

#[tokio::test(flavor = "multi_thread")]
async fn push_then_pull_round_trip() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;

    let (status, body) = push(
        &app,
        json!({"userId": "u1", "items": [{"key": "notes", "value": "[]", "updatedAt": 100}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["timestamp"].as_i64().unwrap() > 0);

    let (status, body) = pull(&app, json!({"userId": "u1", "since": 0})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["items"],
        json!([{"key": "notes", "value": "[]", "updatedAt": 100, "deletedAt": null}])
    );
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_defaults_since_and_uses_strict_boundary() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;
    push(
        &app,
        json!({"userId": "u1", "items": [
            {"key": "a", "value": "1", "updatedAt": 100},
            {"key": "b", "value": "2", "updatedAt": 200}
        ]}),
    )
    .await;

    let (_, body) = pull(&app, json!({"userId": "u1"})).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (_, body) = pull(&app, json!({"userId": "u1", "since": 100})).await;
    assert_eq!(body["items"][0]["key"], "b");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (_, body) = pull(&app, json!({"userId": "u1", "since": 200})).await;
    assert_eq!(body["items"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_push_is_idempotent() {
    let (app, store) = test_app(AppConfig::ephemeral()).await;
    let body = json!({"userId": "u1", "items": [{"key": "notes", "value": "[1]", "updatedAt": 5}]});

    push(&app, body.clone()).await;
    push(&app, body).await;

    let documents = store.get_documents("u1", 0).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].value.as_deref(), Some("[1]"));
}

#[tokio::test(flavor = "multi_thread")]
async fn owners_never_see_each_other() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;
    push(
        &app,
        json!({"userId": "alice", "items": [{"key": "notes", "value": "secret", "updatedAt": 1}]}),
    )
    .await;

    let (_, body) = pull(&app, json!({"userId": "bob", "since": 0})).await;
    assert_eq!(body["items"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn tombstones_propagate() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;
    push(
        &app,
        json!({"userId": "u1", "items": [{"key": "notes", "value": "[]", "updatedAt": 10}]}),
    )
    .await;
    push(
        &app,
        json!({"userId": "u1", "items": [
            {"key": "notes", "value": null, "updatedAt": 20, "deletedAt": 20}
        ]}),
    )
    .await;

    let (_, body) = pull(&app, json!({"userId": "u1", "since": 10})).await;
    assert_eq!(body["items"][0]["deletedAt"], 20);
    assert_eq!(body["items"][0]["value"], Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_payloads_are_rejected_without_writes() {
    let (app, store) = test_app(AppConfig::ephemeral()).await;

    let cases = [
        json!({"items": [{"key": "notes", "value": "[]", "updatedAt": 1}]}),
        json!({"userId": "", "items": []}),
        json!({"userId": "u1", "items": [{"key": "notes", "value": "[]"}]}),
        json!({"userId": "u1", "items": [{"key": "notes", "value": "[]", "updatedAt": -1}]}),
        json!({"userId": "u1", "items": [{"key": "notes", "value": "[]", "updatedAt": 1.5}]}),
        json!({"userId": "u1", "items": [
            {"key": "ok", "value": "[]", "updatedAt": 1},
            {"key": "", "value": "[]", "updatedAt": 1}
        ]}),
    ];
    for case in cases {
        let (status, body) = push(&app, case.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case: {case}");
        assert_eq!(body["error"], "INVALID_PAYLOAD", "case: {case}");
        assert!(body["message"].is_string());
    }

    assert!(store.get_documents("u1", 0).await.unwrap().is_empty());
    assert!(store.get_documents("", 0).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_pull_requests_are_rejected() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;

    for body in [
        json!({"since": 0}),
        json!({"userId": "u1", "since": -5}),
        json!({"userId": "u1", "since": "yesterday"}),
    ] {
        let (status, response) = pull(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "INVALID_PAYLOAD");
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/sync/pull")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_routes_return_not_found() {
    let (app, _store) = test_app(AppConfig::ephemeral()).await;
    let (status, body) = call(&app, Method::GET, "/sync/everything", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_store_reports_storage_failure() {
    let (app, store) = test_app(AppConfig::ephemeral()).await;
    store.close().await.unwrap();

    let (status, body) = pull(&app, json!({"userId": "u1"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "STORAGE_FAILURE");
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_applies_per_owner() {
    let config = AppConfig {
        rate_limit_window: Duration::from_secs(60),
        sync_rate_limit_per_window: 2,
        ..AppConfig::ephemeral()
    };
    let (app, _store) = test_app(config).await;

    for _ in 0..2 {
        let (status, _) = pull(&app, json!({"userId": "u1"})).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = pull(&app, json!({"userId": "u1"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMITED");

    let (status, _) = pull(&app, json!({"userId": "u2"})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rateLimit"]["pullAllowed"], 3);
    assert_eq!(body["rateLimit"]["pullLimited"], 1);
}
