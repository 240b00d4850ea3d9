use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NotificationChannel;
use crate::models::analysis::AnalysisType;

/// Location of a media object in S3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Object {
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaceAttributes {
    #[default]
    Default,
    All,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextFilters {
    pub min_confidence: Option<f64>,
    pub min_bounding_box_height: Option<f64>,
    pub min_bounding_box_width: Option<f64>,
}

/// Type-specific analysis options.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeOptions {
    Labels {
        min_confidence: f64,
        max_labels: Option<u32>,
    },
    Faces {
        attributes: FaceAttributes,
    },
    Moderation {
        min_confidence: f64,
    },
    TextDetection {
        filters: TextFilters,
    },
}

impl TypeOptions {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            Self::Labels { .. } => AnalysisType::Labels,
            Self::Faces { .. } => AnalysisType::Faces,
            Self::Moderation { .. } => AnalysisType::Moderation,
            Self::TextDetection { .. } => AnalysisType::TextDetection,
        }
    }
}

/// Provider-agnostic request to start an asynchronous analysis job.
#[derive(Debug, Clone)]
pub struct StartAnalysisRequest {
    pub source: S3Object,
    pub notification_channel: NotificationChannel,
    pub client_token: String,
    pub job_tag: Option<String>,
    pub options: TypeOptions,
}

/// Request for synchronous analysis of a still image.
#[derive(Debug, Clone)]
pub struct DetectImageRequest {
    pub source: S3Object,
    pub options: TypeOptions,
}

/// The external recognition service.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Start an asynchronous job and return the provider job id.
    async fn start_analysis(&self, request: &StartAnalysisRequest) -> Result<String, ProviderError>;

    /// Fetch the complete raw result of a finished job, all pages combined.
    async fn fetch_results(
        &self,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Analyze an image synchronously and return the raw response.
    async fn detect_image(
        &self,
        request: &DetectImageRequest,
    ) -> Result<serde_json::Value, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {error_type}: {message}")]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("Provider job {job_id} is {status}: {message}")]
    JobNotReady {
        job_id: String,
        status: String,
        message: String,
    },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider call timed out")]
    Timeout,
}
