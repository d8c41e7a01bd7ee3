use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::redis::RedisHealth;
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let api = state.settings().api();
    Json(RootResponse {
        message: format!("{} API", api.project_name),
        version: api.version.clone(),
        api_prefix: api.api_v1_str.clone(),
    })
}

pub(crate) async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut status = "healthy";
    let mut components = HashMap::new();

    match state.redis().health().await {
        RedisHealth::Healthy => {
            components.insert("redis".to_string(), "healthy".to_string());
        }
        RedisHealth::Disconnected => {
            components.insert("redis".to_string(), "disconnected".to_string());
        }
        RedisHealth::Unhealthy(error) => {
            components.insert("redis".to_string(), format!("unhealthy: {error}"));
            status = "degraded";
        }
    }

    match repositories::health::ping(state.db()).await {
        Ok(()) => {
            components.insert("database".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("database".to_string(), format!("unhealthy: {err}"));
            status = "unhealthy";
        }
    }

    let code = if status == "unhealthy" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    let body = HealthResponse {
        service: "exam-service".to_string(),
        status: status.to_string(),
        components,
    };

    (code, Json(body))
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
