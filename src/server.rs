use crate::config::ConfigSource;
use crate::deployments::Deployment;
use crate::error::{RelayError, Result};
use crate::logging::SharedLogger;
use crate::payload::Payload;
use crate::pipeline::{last_user_message, AzurePipeline, PipeOutput};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub pipeline: AzurePipeline,
    pub logger: SharedLogger,
    /// Where reloads read configuration from.
    pub config_source: ConfigSource,
}

impl AppState {
    /// Re-read configuration and publish the new deployment list.
    pub fn reload(&self) -> Result<Vec<Deployment>> {
        let config = self.config_source.load()?;
        let deployments = self.pipeline.on_config_updated(config.azure);
        self.logger.info(
            "server",
            format!("Configuration reloaded, {} deployments", deployments.len()),
        );
        Ok(deployments)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/models", get(handle_models))
        .route("/health", get(handle_health))
        .route("/admin/reload", post(handle_reload))
        .route("/admin/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: Payload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {}", e));
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("Invalid request body: {}", e),
            );
        }
    };

    let Some(model) = payload.get("model").and_then(|m| m.as_str()).map(str::to_string) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing 'model' field".to_string(),
        );
    };

    let messages: Vec<serde_json::Value> = payload
        .get("messages")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let user_message = last_user_message(&messages);

    match state
        .pipeline
        .pipe(&user_message, &model, &messages, payload)
        .await
    {
        PipeOutput::Json(value) => Json(value).into_response(),
        PipeOutput::Lines(lines) => {
            let body = Body::from_stream(lines.map(|line| line.map(|l| Bytes::from(l + "\n"))));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        PipeOutput::Error { message, error } => {
            error_response(relay_error_status(&error), error.kind(), message)
        }
    }
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let prefix = state.pipeline.name();
    let models: Vec<serde_json::Value> = state
        .pipeline
        .deployments()
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "id": d.id,
                "name": format!("{prefix}{}", d.name),
                "object": "model",
                "owned_by": "azure-openai",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_reload(State(state): State<Arc<AppState>>) -> Response {
    match state.reload() {
        Ok(deployments) => Json(serde_json::json!({ "data": deployments })).into_response(),
        Err(e) => {
            state.logger.error("server", format!("Reload failed: {}", e));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.kind(), e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.logger.recent(query.limit.unwrap_or(100));
    Json(serde_json::json!({ "data": entries }))
}

fn relay_error_status(e: &RelayError) -> StatusCode {
    match e {
        RelayError::Upstream { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    let body = serde_json::json!({
        "error": {
            "message": message,
            "type": kind,
        }
    });
    (status, Json(body)).into_response()
}
