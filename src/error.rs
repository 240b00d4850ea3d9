use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::ConfigurationError;
use crate::services::media_store::StoreError;
use crate::services::merger::MergeError;
use crate::services::provider::ProviderError;
use crate::services::queue::QueueError;
use crate::services::registry::RegistryError;
use crate::services::submitter::SubmitError;

/// Every failure an analysis operation can surface to a caller.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Media {0} not found")]
    UnknownMedia(i64),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Merge error: {0}")]
    Merge(MergeError),

    #[error("Media store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<SubmitError> for AnalysisError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Configuration(e) => Self::Configuration(e),
            SubmitError::Provider(e) => Self::Provider(e),
        }
    }
}

impl From<MergeError> for AnalysisError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::UnknownMedia(id) => Self::UnknownMedia(id),
            other => Self::Merge(other),
        }
    }
}

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::UnknownMedia(id),
            other => Self::Store(other),
        }
    }
}

impl AnalysisError {
    /// Whether running the same step again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(ProviderError::Api { status, .. }) => *status >= 500 || *status == 429,
            Self::Store(StoreError::Corrupt(_)) => false,
            Self::Merge(MergeError::Store(StoreError::Corrupt(_))) => false,
            Self::Provider(_) | Self::Store(_) | Self::Queue(_) => true,
            Self::Merge(MergeError::Store(_)) => true,
            Self::Registry(RegistryError::Database(_)) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnknownMedia(_) | Self::Registry(RegistryError::UnknownJob(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Merge(MergeError::Malformed(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Analysis request failed");
        }

        let message = match &self {
            // Internal details stay in the logs.
            Self::Configuration(_) | Self::Registry(_) | Self::Store(_) | Self::Queue(_)
                if status == StatusCode::INTERNAL_SERVER_ERROR =>
            {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
