//! HTTP API tests driven through the router without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceExt;

use rag_testgen::error::ServiceError;
use rag_testgen::pipeline::{Pipeline, PipelineSettings};
use rag_testgen::server::{router, AppState};
use rag_testgen::store::memory::InMemoryStore;
use rag_testgen::testing::{HashEmbedder, ScriptedGenerator};

const SPECS: &str = "Discount code SAVE15 gives 15% off the cart subtotal. \
    Expired codes show the message Invalid code.";

fn app(generator: ScriptedGenerator) -> Router {
    let pipeline = Pipeline::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder::default()),
        Arc::new(generator),
        PipelineSettings::default(),
    );
    router(AppState::new(Arc::new(pipeline)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn index_specs(app: &Router) {
    let (status, body) = send(
        app,
        "POST",
        "/index",
        Some(json!({ "documents": [{ "source_id": "product_specs.md", "text": SPECS }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn health_and_initial_state() {
    let app = app(ScriptedGenerator::new());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "EMPTY");
    assert_eq!(body["records"], 0);
}

#[tokio::test]
async fn test_cases_on_empty_index_conflict() {
    let app = app(ScriptedGenerator::new());
    let (status, body) = send(
        &app,
        "POST",
        "/test-cases",
        Some(json!({ "request": "discount codes" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "empty_index");
}

#[tokio::test]
async fn index_generate_and_script_flow() {
    let cases = json!([{
        "id": "TC001",
        "title": "Valid discount",
        "scenario": "Apply SAVE15",
        "steps": ["Enter SAVE15", "Click Apply"],
        "expected": "15% off",
        "based_on": "product_specs.md"
    }]);
    let app = app(
        ScriptedGenerator::new()
            .with_response(cases.to_string())
            .with_response("from selenium import webdriver\n"),
    );

    index_specs(&app).await;
    let (_, state) = send(&app, "GET", "/state", None).await;
    assert_eq!(state["phase"], "INDEXED");
    assert_eq!(state["records"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/test-cases",
        Some(json!({ "request": "discount codes", "k": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["test_cases"][0]["id"], "TC001");
    assert_eq!(body["test_cases"][0]["based_on"], "product_specs.md");

    let (status, body) = send(
        &app,
        "POST",
        "/scripts",
        Some(json!({
            "test_case_id": "TC001",
            "page_markup": "<form><input id=\"discount\"><button id=\"apply\">Apply</button></form>"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["based_on"], "TC001");
    assert_eq!(body["framework"], "selenium-python");
    assert!(body["text"].as_str().unwrap().starts_with("from selenium"));

    let (_, state) = send(&app, "GET", "/state", None).await;
    assert_eq!(state["phase"], "SCRIPT_READY");
}

#[tokio::test]
async fn index_accepts_base64_content() {
    let app = app(ScriptedGenerator::new());
    let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"rules": ["SAVE15"]}"#);
    let (status, body) = send(
        &app,
        "POST",
        "/index",
        Some(json!({
            "documents": [{ "source_id": "rules.json", "content_base64": encoded }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["documents"], 1);
    assert_eq!(body["chunks_added"], 1);
}

#[tokio::test]
async fn index_rejects_bad_uploads() {
    let app = app(ScriptedGenerator::new());

    let (status, body) = send(
        &app,
        "POST",
        "/index",
        Some(json!({ "documents": [{ "source_id": "a.xlsx", "format": "xlsx", "text": "x" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unsupported_format");

    let (status, body) = send(
        &app,
        "POST",
        "/index",
        Some(json!({ "documents": [{ "source_id": "a.txt" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(
        &app,
        "POST",
        "/index",
        Some(json!({ "documents": [{ "source_id": "broken.json", "text": "{not json" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_content");

    let (_, state) = send(&app, "GET", "/state", None).await;
    assert_eq!(state["phase"], "EMPTY");
}

#[tokio::test]
async fn script_errors_map_to_client_statuses() {
    let app = app(ScriptedGenerator::new());
    index_specs(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/scripts",
        Some(json!({ "test_case_id": "TC404", "page_markup": "<html></html>" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_test_case");

    let (status, body) = send(
        &app,
        "POST",
        "/scripts",
        Some(json!({ "test_case_id": "TC001", "page_markup": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_markup");
}

#[tokio::test]
async fn quota_error_reports_retry_delay() {
    let app = app(ScriptedGenerator::new().with_error(ServiceError::Quota {
        provider: "gemini".into(),
        message: "RESOURCE_EXHAUSTED".into(),
        retry_after: Some(Duration::from_secs(12)),
    }));
    index_specs(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/test-cases",
        Some(json!({ "request": "discount codes" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "quota_exceeded");
    assert_eq!(body["error"]["retry_after_secs"], 12.0);
}

#[tokio::test]
async fn unparseable_generation_is_unprocessable() {
    let app = app(ScriptedGenerator::new().with_response("I cannot help with that."));
    index_specs(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/test-cases",
        Some(json!({ "request": "discount codes" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "generation_parse");
}
