use std::collections::HashMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::job::{AnalysisJob, AppliedJob};
use crate::services::provider::FaceAttributes;

/// Optional tuning for one analysis run.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AnalysisOptions {
    #[garde(range(min = 0.0, max = 100.0))]
    pub min_confidence: Option<f64>,

    /// Maximum number of labels returned for image analysis
    #[garde(range(min = 1, max = 1000))]
    pub max_results: Option<u32>,

    #[garde(skip)]
    pub face_attributes: Option<FaceAttributes>,

    /// Text smaller than this fraction of the frame height is ignored
    #[garde(range(min = 0.0, max = 1.0))]
    pub min_bounding_box_height: Option<f64>,

    #[garde(range(min = 0.0, max = 1.0))]
    pub min_bounding_box_width: Option<f64>,
}

/// Request to analyze a media record.
#[derive(Debug, Deserialize, Validate)]
pub struct AnalysisRequest {
    #[garde(skip)]
    pub analysis_type: AnalysisType,

    /// Overrides the media record's disk
    #[garde(length(min = 1, max = 64))]
    pub disk: Option<String>,

    /// Overrides the media record's object key
    #[garde(length(min = 1, max = 1024))]
    pub path: Option<String>,

    #[serde(default)]
    #[garde(dive)]
    pub options: AnalysisOptions,
}

/// Response after submitting an asynchronous analysis job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub media_id: i64,
    pub analysis_type: AnalysisType,
    pub job_id: String,
    pub client_token: String,
    pub status: String,
}

/// Stored analysis state of one media record.
#[derive(Debug, Serialize, Deserialize)]
pub struct MediaAnalysisResponse {
    pub media_id: i64,
    pub results: HashMap<AnalysisType, AnalysisResult>,
    pub applied: HashMap<AnalysisType, AppliedJob>,
    pub job_ids: HashMap<AnalysisType, String>,
}

/// Response for querying a job in the registry.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: String,
    pub media_id: i64,
    pub analysis_type: AnalysisType,
    pub status: String,
    pub retry_count: i32,
    pub error: Option<String>,
}

impl From<AnalysisJob> for JobResponse {
    fn from(job: AnalysisJob) -> Self {
        Self {
            job_id: job.job_id,
            media_id: job.media_id,
            analysis_type: job.analysis_type,
            status: job.status.to_string(),
            retry_count: job.retry_count,
            error: job.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_options() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"analysis_type": "labels"}"#).unwrap();
        assert_eq!(request.analysis_type, AnalysisType::Labels);
        assert!(request.options.min_confidence.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_rejects_out_of_range_confidence() {
        let request: AnalysisRequest = serde_json::from_str(
            r#"{"analysis_type": "moderation", "options": {"min_confidence": 120}}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_request_parses_face_attributes() {
        let request: AnalysisRequest = serde_json::from_str(
            r#"{"analysis_type": "faces", "options": {"face_attributes": "ALL"}}"#,
        )
        .unwrap();
        assert_eq!(request.options.face_attributes, Some(FaceAttributes::All));
    }
}
