use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::AnalysisError;
use crate::models::requests::{
    AnalysisRequest, JobResponse, MediaAnalysisResponse, SubmissionResponse,
};

/// POST /api/v1/media/{media_id}/analysis — start an asynchronous analysis job.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Path(media_id): Path<i64>,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), AnalysisError> {
    request
        .validate()
        .map_err(|e| AnalysisError::Validation(e.to_string()))?;

    let job = state.pipeline.start_analysis(media_id, &request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionResponse {
            media_id,
            analysis_type: job.analysis_type,
            job_id: job.job_id,
            client_token: job.client_token,
            status: job.status.to_string(),
        }),
    ))
}

/// POST /api/v1/media/{media_id}/detect — analyze an image and store the result.
pub async fn detect_image(
    State(state): State<AppState>,
    Path(media_id): Path<i64>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<SubmissionResponse>, AnalysisError> {
    request
        .validate()
        .map_err(|e| AnalysisError::Validation(e.to_string()))?;

    let (job, outcome) = state.pipeline.analyze_image(media_id, &request).await?;
    tracing::debug!(media_id, job_id = %job.job_id, outcome = ?outcome, "Image analyzed");

    Ok(Json(SubmissionResponse {
        media_id,
        analysis_type: job.analysis_type,
        job_id: job.job_id,
        client_token: job.client_token,
        status: "completed".to_string(),
    }))
}

/// GET /api/v1/media/{media_id}/analysis — stored results per analysis type.
pub async fn get_media_analysis(
    State(state): State<AppState>,
    Path(media_id): Path<i64>,
) -> Result<Json<MediaAnalysisResponse>, AnalysisError> {
    let media = state.pipeline.load_media(media_id).await?;

    Ok(Json(MediaAnalysisResponse {
        media_id,
        results: media.analysis.results,
        applied: media.analysis.applied,
        job_ids: media.analysis.job_ids,
    }))
}

/// GET /api/v1/jobs/{job_id} — registry record of one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, AnalysisError> {
    let job = state.pipeline.job(&job_id).await?;
    Ok(Json(job.into()))
}
