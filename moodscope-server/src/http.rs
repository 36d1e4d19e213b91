//! Moodscope HTTP API
//!
//! Axum-based HTTP server exposing text and face analysis plus the shared
//! history. Each endpoint has a thin axum handler that delegates to an inner
//! function returning `(StatusCode, Value)`, so the logic is testable without
//! axum dispatch.
//!
//! Endpoints:
//! - GET  /              landing page
//! - POST /analyze       analyze text or an uploaded face image
//! - GET  /history       up to 50 most recent analyses
//! - POST /clear_history delete every analysis
//! - GET  /health        health check with store status
//! - GET  /version       server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use moodscope_core::config::HttpConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router::{self, AnalyzeError, AnalyzeForm, AppState, UploadedImage};

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/", get(index_handler))
        .route("/analyze", post(analyze_handler))
        .route("/history", get(history_handler))
        .route("/clear_history", post(clear_history_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: AppState,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Moodscope HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct TextForm {
    pub text: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner analyze: dispatch the form and shape the reply.
pub async fn analyze_inner(state: &AppState, form: AnalyzeForm) -> (StatusCode, Value) {
    match router::analyze(state, form).await {
        Ok(result) => (StatusCode::OK, json!({ "success": true, "result": result })),
        Err(e) => error_reply(&e),
    }
}

/// Inner history: most recent analyses, newest first.
pub async fn history_inner(state: &AppState) -> (StatusCode, Value) {
    match state.store.history().await {
        Ok(entries) => match serde_json::to_value(entries) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => internal_error(e),
        },
        Err(e) => {
            tracing::error!(error = %e, "History query failed");
            internal_error(e)
        }
    }
}

/// Inner clear: delete every analysis.
pub async fn clear_history_inner(state: &AppState) -> (StatusCode, Value) {
    match state.store.clear().await {
        Ok(_) => (StatusCode::OK, json!({ "success": true })),
        Err(e) => {
            tracing::error!(error = %e, "Clearing history failed");
            internal_error(e)
        }
    }
}

/// Inner health check: queries the store and returns (status_code, json_body).
pub async fn health_inner(state: &AppState) -> (StatusCode, Value) {
    let sqlite_ver = match moodscope_core::db::health_check(state.store.pool()).await {
        Ok(v) => v,
        Err(e) => return unhealthy(e),
    };

    let analyses = match state.store.count().await {
        Ok(n) => n,
        Err(e) => return unhealthy(e),
    };

    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sqlite": sqlite_ver,
            "analyses": analyses,
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "moodscope",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn analyze_handler(State(state): State<Arc<AppState>>, req: Request) -> impl IntoResponse {
    let (status, body) = match read_analyze_form(req).await {
        Ok(form) => analyze_inner(&state, form).await,
        Err(message) => {
            tracing::warn!(error = %message, "Rejected malformed analyze request");
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
    };
    (status, Json(body))
}

pub async fn history_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = history_inner(&state).await;
    (status, Json(body))
}

pub async fn clear_history_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = clear_history_inner(&state).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Helpers
// ============================================================================

/// Map an analysis failure onto its HTTP status.
pub fn status_for(err: &AnalyzeError) -> StatusCode {
    match err {
        AnalyzeError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalyzeError::Inference(_) | AnalyzeError::Persistence(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_reply(err: &AnalyzeError) -> (StatusCode, Value) {
    (status_for(err), json!({ "error": err.to_string() }))
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": err.to_string() }),
    )
}

fn unhealthy(err: impl std::fmt::Display) -> (StatusCode, Value) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        json!({
            "status": "unhealthy",
            "error": err.to_string(),
        }),
    )
}

/// Pull `text` and `image` out of a multipart or urlencoded body.
///
/// Any other content type yields an empty form. Malformed bodies are errors.
pub async fn read_analyze_form(req: Request) -> std::result::Result<AnalyzeForm, String> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| e.body_text())?;
        read_multipart(multipart).await
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(fields) = Form::<TextForm>::from_request(req, &())
            .await
            .map_err(|e| e.body_text())?;
        Ok(AnalyzeForm {
            text: fields.text,
            image: None,
        })
    } else {
        Ok(AnalyzeForm::default())
    }
}

async fn read_multipart(mut multipart: Multipart) -> std::result::Result<AnalyzeForm, String> {
    let mut form = AnalyzeForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => {
                form.text = Some(field.text().await.map_err(|e| e.body_text())?);
            }
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| e.body_text())?;
                if !filename.is_empty() {
                    form.image = Some(UploadedImage { filename, bytes });
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
