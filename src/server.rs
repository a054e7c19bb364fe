//! HTTP API over the [`Pipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/state` | Current phase and store counts |
//! | `POST` | `/index` | Parse, chunk and index uploaded documents |
//! | `POST` | `/test-cases` | Generate grounded test cases |
//! | `POST` | `/scripts` | Generate an automation script for a test case |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_index", "message": "...", "retry_after_secs": 12.5 } }
//! ```
//!
//! | Status | Codes |
//! |--------|-------|
//! | 400 | `bad_request`, `unsupported_format`, `malformed_content`, `missing_markup`, `invalid_config` |
//! | 404 | `unknown_test_case` |
//! | 409 | `empty_index` |
//! | 422 | `generation_parse`, `no_grounded_output` |
//! | 429 | `quota_exceeded` (with `retry_after_secs` when known) |
//! | 502 | `service_error`, `service_disabled`, `dimension_mismatch` |
//! | 500 | `storage_error` |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{Error, ServiceError};
use crate::models::{Phase, ScriptArtifact, SourceDocument, TestCase};
use crate::parse::DocumentFormat;
use crate::pipeline::{BuildReport, Pipeline};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Build the router with all routes, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/state", get(handle_state))
        .route("/index", post(handle_index))
        .route("/test-cases", post(handle_test_cases))
        .route("/scripts", post(handle_scripts))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on `[server].bind` and run until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let app = router(AppState::new(pipeline.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "testgen server listening");
    axum::serve(listener, app).await?;

    pipeline.close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<f64>,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<f64>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn service_status(err: &ServiceError) -> (StatusCode, &'static str) {
    match err {
        ServiceError::Quota { .. } => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
        ServiceError::Disabled(_) => (StatusCode::BAD_GATEWAY, "service_disabled"),
        _ => (StatusCode::BAD_GATEWAY, "service_error"),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let inner = match &err {
            Error::IndexBuild { source, .. } => source.as_ref(),
            other => other,
        };
        let (status, code) = match inner {
            Error::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            Error::MalformedContent { .. } => (StatusCode::BAD_REQUEST, "malformed_content"),
            Error::InvalidChunkConfig { .. } => (StatusCode::BAD_REQUEST, "invalid_config"),
            Error::MissingMarkup => (StatusCode::BAD_REQUEST, "missing_markup"),
            Error::DuplicateSource(_) => (StatusCode::BAD_REQUEST, "duplicate_source"),
            Error::UnknownTestCase(_) => (StatusCode::NOT_FOUND, "unknown_test_case"),
            Error::EmptyIndex => (StatusCode::CONFLICT, "empty_index"),
            Error::IndexChanged => (StatusCode::CONFLICT, "index_changed"),
            Error::GenerationParse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "generation_parse"),
            Error::NoGroundedOutput { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "no_grounded_output")
            }
            Error::EmbeddingService(e) | Error::GenerationService(e) => service_status(e),
            Error::DimensionMismatch { .. } => (StatusCode::BAD_GATEWAY, "dimension_mismatch"),
            Error::Storage(_) | Error::IndexBuild { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::warn!(error = %err, "request rejected");
        }

        AppError {
            status,
            code,
            retry_after_secs: inner
                .service_error()
                .and_then(|e| e.retry_after())
                .map(|d| d.as_secs_f64()),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                retry_after_secs: self.retry_after_secs,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /state ============

#[derive(Serialize)]
struct StateResponse {
    phase: Phase,
    records: usize,
    test_cases: usize,
    scripts: usize,
}

async fn handle_state(State(state): State<AppState>) -> Result<Json<StateResponse>, AppError> {
    let counts = state.pipeline.counts().await?;
    Ok(Json(StateResponse {
        phase: counts.phase(),
        records: counts.records,
        test_cases: counts.test_cases,
        scripts: counts.scripts,
    }))
}

// ============ POST /index ============

#[derive(Deserialize)]
struct UploadedDocument {
    source_id: String,
    /// Format tag; inferred from the `source_id` extension when absent.
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
}

#[derive(Deserialize)]
struct IndexRequest {
    documents: Vec<UploadedDocument>,
    #[serde(default)]
    rebuild: bool,
}

impl UploadedDocument {
    fn into_source(self) -> Result<SourceDocument, AppError> {
        if self.source_id.trim().is_empty() {
            return Err(bad_request("source_id must not be empty"));
        }
        let format = match &self.format {
            Some(tag) => tag.parse::<DocumentFormat>()?,
            None => DocumentFormat::from_path(Path::new(&self.source_id)),
        };
        let content = match (self.text, self.content_base64) {
            (Some(text), None) => text.into_bytes(),
            (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| {
                    bad_request(format!("{}: invalid content_base64: {}", self.source_id, e))
                })?,
            _ => {
                return Err(bad_request(format!(
                    "{}: exactly one of text or content_base64 is required",
                    self.source_id
                )))
            }
        };
        Ok(SourceDocument::new(self.source_id, format, content))
    }
}

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<BuildReport>, AppError> {
    if req.documents.is_empty() && !req.rebuild {
        return Err(bad_request("documents must not be empty"));
    }
    let documents = req
        .documents
        .into_iter()
        .map(UploadedDocument::into_source)
        .collect::<Result<Vec<_>, _>>()?;

    let report = state.pipeline.build_index(documents, req.rebuild).await?;
    Ok(Json(report))
}

// ============ POST /test-cases ============

#[derive(Deserialize)]
struct TestCasesRequest {
    request: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    context_chars: Option<usize>,
}

#[derive(Serialize)]
struct TestCasesResponse {
    test_cases: Vec<TestCase>,
}

async fn handle_test_cases(
    State(state): State<AppState>,
    Json(req): Json<TestCasesRequest>,
) -> Result<Json<TestCasesResponse>, AppError> {
    if req.request.trim().is_empty() {
        return Err(bad_request("request must not be empty"));
    }
    let test_cases = state
        .pipeline
        .generate_test_cases(&req.request, req.k, req.context_chars)
        .await?;
    Ok(Json(TestCasesResponse { test_cases }))
}

// ============ POST /scripts ============

#[derive(Deserialize)]
struct ScriptRequest {
    test_case_id: String,
    page_markup: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_scripts(
    State(state): State<AppState>,
    Json(req): Json<ScriptRequest>,
) -> Result<Json<ScriptArtifact>, AppError> {
    let artifact = state
        .pipeline
        .generate_script(&req.test_case_id, &req.page_markup, req.k)
        .await?;
    Ok(Json(artifact))
}
