pub mod analysis;
pub mod health;
pub mod metrics;
pub mod webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;

/// Response for unknown routes. Rejected webhooks return exactly the same.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

async fn fallback() -> Response {
    not_found()
}

/// Application routes without the metrics endpoint and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/media/{media_id}/analysis",
            post(analysis::submit_analysis).get(analysis::get_media_analysis),
        )
        .route("/api/v1/media/{media_id}/detect", post(analysis::detect_image))
        .route("/api/v1/jobs/{job_id}", get(analysis::get_job))
        .route("/webhooks/rekognition", post(webhook::rekognition_webhook))
        .fallback(fallback)
        .with_state(state)
}
