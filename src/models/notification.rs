use serde::{Deserialize, Serialize};

use crate::models::analysis::AnalysisType;

/// Raw SNS HTTP(S) delivery envelope.
///
/// Nothing in here is trusted until the signature has been verified.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: String,
    pub topic_arn: String,
    pub message: String,
    pub timestamp: String,
    pub signature_version: String,
    pub signature: String,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, rename = "SubscribeURL")]
    pub subscribe_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// A notification that passed signature verification.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticatedNotification {
    Notification {
        message_id: String,
        topic_arn: String,
        message: String,
    },
    SubscriptionConfirmation {
        topic_arn: String,
        subscribe_url: String,
    },
    UnsubscribeConfirmation {
        topic_arn: String,
    },
}

/// Terminal status reported by the provider for an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderJobStatus {
    Succeeded,
    Failed,
    Error,
}

impl ProviderJobStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoReference {
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_object_name: Option<String>,
}

/// Job completion message published by Rekognition to the SNS topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobCompletion {
    #[serde(rename = "JobId")]
    pub job_id: String,
    #[serde(rename = "Status")]
    pub status: ProviderJobStatus,
    #[serde(rename = "API")]
    pub api: String,
    #[serde(rename = "JobTag", default)]
    pub job_tag: Option<String>,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<i64>,
    #[serde(rename = "Video", default)]
    pub video: Option<VideoReference>,
}

impl JobCompletion {
    pub fn parse(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }

    /// Analysis type marker derived from the `API` field.
    pub fn analysis_type(&self) -> Option<AnalysisType> {
        AnalysisType::from_start_action(&self.api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_completion() {
        let message = r#"{
            "JobId": "abc123",
            "Status": "SUCCEEDED",
            "API": "StartLabelDetection",
            "JobTag": "labels_42",
            "Timestamp": 1700000000000,
            "Video": {"S3ObjectName": "videos/cat.mp4", "S3Bucket": "media"}
        }"#;

        let completion = JobCompletion::parse(message).unwrap();
        assert_eq!(completion.job_id, "abc123");
        assert!(completion.status.succeeded());
        assert_eq!(completion.analysis_type(), Some(AnalysisType::Labels));
        assert_eq!(
            completion.video.unwrap().s3_object_name.as_deref(),
            Some("videos/cat.mp4")
        );
    }

    #[test]
    fn test_parse_failed_completion() {
        let message = r#"{"JobId":"j1","Status":"FAILED","API":"StartTextDetection"}"#;
        let completion = JobCompletion::parse(message).unwrap();
        assert_eq!(completion.status, ProviderJobStatus::Failed);
        assert_eq!(completion.analysis_type(), Some(AnalysisType::TextDetection));
    }

    #[test]
    fn test_parse_rejects_missing_job_id() {
        assert!(JobCompletion::parse(r#"{"Status":"SUCCEEDED","API":"StartFaceDetection"}"#).is_err());
    }
}
