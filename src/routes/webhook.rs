use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;
use crate::error::AnalysisError;
use crate::models::notification::{AuthenticatedNotification, JobCompletion};
use crate::routes::not_found;
use crate::services::queue::CompletionTask;
use crate::services::registry::RegistryError;

/// POST /webhooks/rekognition — SNS delivery of Rekognition job completions.
///
/// Every rejection answers like an unknown route; the reason is only logged.
pub async fn rekognition_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let notification = match state.authenticator.authenticate(&body).await {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            metrics::counter!("webhook_rejected_total", "reason" => "authentication").increment(1);
            return not_found();
        }
    };

    match notification {
        AuthenticatedNotification::Notification {
            message_id,
            message,
            ..
        } => accept_completion(&state, message_id, &message).await,
        AuthenticatedNotification::SubscriptionConfirmation {
            topic_arn,
            subscribe_url,
        } => confirm_subscription(&state, &topic_arn, &subscribe_url).await,
        AuthenticatedNotification::UnsubscribeConfirmation { topic_arn } => {
            tracing::warn!(topic_arn = %topic_arn, "Topic subscription removed");
            StatusCode::OK.into_response()
        }
    }
}

async fn accept_completion(state: &AppState, message_id: String, message: &str) -> Response {
    let completion = match JobCompletion::parse(message) {
        Ok(completion) => completion,
        Err(e) => {
            tracing::warn!(message_id = %message_id, error = %e, "Unparseable job completion");
            metrics::counter!("webhook_rejected_total", "reason" => "message").increment(1);
            return not_found();
        }
    };

    let job = match state.pipeline.job(&completion.job_id).await {
        Ok(job) => job,
        Err(AnalysisError::Registry(RegistryError::UnknownJob(job_id))) => {
            tracing::error!(job_id = %job_id, message_id = %message_id, "Completion for unknown job");
            metrics::counter!("webhook_rejected_total", "reason" => "unknown_job").increment(1);
            return not_found();
        }
        Err(e) => return e.into_response(),
    };

    if completion.analysis_type() != Some(job.analysis_type) {
        tracing::warn!(
            job_id = %job.job_id,
            api = %completion.api,
            expected = %job.analysis_type,
            "Completion API does not match the registered analysis type"
        );
        metrics::counter!("webhook_rejected_total", "reason" => "type_mismatch").increment(1);
        return not_found();
    }

    let task = CompletionTask {
        job_id: completion.job_id,
        status: completion.status,
        message_id,
    };
    if let Err(e) = state.queue.enqueue(&task).await {
        return AnalysisError::from(e).into_response();
    }

    metrics::counter!("webhook_accepted_total").increment(1);
    tracing::info!(
        job_id = %task.job_id,
        media_id = job.media_id,
        status = ?task.status,
        "Queued job completion"
    );
    StatusCode::OK.into_response()
}

async fn confirm_subscription(state: &AppState, topic_arn: &str, subscribe_url: &str) -> Response {
    tracing::info!(topic_arn = %topic_arn, "Confirming SNS subscription");

    match state.http.get(subscribe_url).send().await {
        Ok(response) if response.status().is_success() => StatusCode::OK.into_response(),
        Ok(response) => {
            tracing::error!(status = %response.status(), "Subscription confirmation rejected");
            StatusCode::BAD_GATEWAY.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Subscription confirmation failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
