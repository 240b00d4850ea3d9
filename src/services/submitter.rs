use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigurationError, RecognitionConfig};
use crate::models::analysis::AnalysisType;
use crate::models::requests::AnalysisOptions;
use crate::services::provider::{
    DetectImageRequest, ProviderError, RecognitionProvider, S3Object, StartAnalysisRequest,
    TextFilters, TypeOptions,
};
use crate::services::token;

/// What to analyze and how.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub media_id: i64,
    pub analysis_type: AnalysisType,
    /// Storage disk; the configured default disk when absent.
    pub disk: Option<String>,
    /// Object key within the disk's bucket.
    pub path: String,
    pub options: AnalysisOptions,
}

/// A job accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    pub client_token: String,
}

/// Builds provider requests from local submissions and dispatches them.
pub struct AnalysisSubmitter {
    config: RecognitionConfig,
    provider: Arc<dyn RecognitionProvider>,
}

impl AnalysisSubmitter {
    pub fn new(config: RecognitionConfig, provider: Arc<dyn RecognitionProvider>) -> Self {
        Self { config, provider }
    }

    /// Start an asynchronous analysis job and return the provider job id.
    ///
    /// Configuration is checked before the provider is contacted. Provider
    /// failures are returned as-is; retrying is left to the caller.
    pub async fn submit(
        &self,
        request: &SubmissionRequest,
        timeout: Option<Duration>,
    ) -> Result<Submission, SubmitError> {
        let bucket = self.config.bucket_for(request.disk.as_deref())?;
        let notification_channel = self.config.notification_channel()?;
        let client_token = token::generate(request.analysis_type, request.media_id);

        let start = StartAnalysisRequest {
            source: S3Object {
                bucket: bucket.to_string(),
                name: request.path.clone(),
            },
            notification_channel,
            client_token: client_token.clone(),
            job_tag: Some(format!("{}_{}", request.analysis_type, request.media_id)),
            options: self.type_options(request.analysis_type, &request.options),
        };

        tracing::info!(
            media_id = request.media_id,
            analysis_type = %request.analysis_type,
            bucket = %start.source.bucket,
            client_token = %client_token,
            "Submitting analysis job"
        );

        let job_id = with_timeout(timeout, self.provider.start_analysis(&start)).await?;

        Ok(Submission {
            job_id,
            client_token,
        })
    }

    /// Analyze a still image synchronously and return the raw provider response.
    pub async fn detect_image(
        &self,
        request: &SubmissionRequest,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, SubmitError> {
        let bucket = self.config.bucket_for(request.disk.as_deref())?;

        let detect = DetectImageRequest {
            source: S3Object {
                bucket: bucket.to_string(),
                name: request.path.clone(),
            },
            options: self.type_options(request.analysis_type, &request.options),
        };

        tracing::info!(
            media_id = request.media_id,
            analysis_type = %request.analysis_type,
            "Running image analysis"
        );

        let raw = with_timeout(timeout, self.provider.detect_image(&detect)).await?;
        Ok(raw)
    }

    /// Fill type-specific options, falling back to the configured confidence.
    fn type_options(&self, analysis_type: AnalysisType, options: &AnalysisOptions) -> TypeOptions {
        let min_confidence = options.min_confidence.unwrap_or(self.config.min_confidence);

        match analysis_type {
            AnalysisType::Labels => TypeOptions::Labels {
                min_confidence,
                max_labels: options.max_results,
            },
            AnalysisType::Faces => TypeOptions::Faces {
                attributes: options.face_attributes.unwrap_or_default(),
            },
            AnalysisType::Moderation => TypeOptions::Moderation { min_confidence },
            AnalysisType::TextDetection => TypeOptions::TextDetection {
                filters: TextFilters {
                    min_confidence: Some(min_confidence),
                    min_bounding_box_height: options.min_bounding_box_height,
                    min_bounding_box_width: options.min_bounding_box_width,
                },
            },
        }
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    call: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ProviderError::Timeout)?,
        None => call.await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_buckets;
    use crate::services::provider::FaceAttributes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        started: Mutex<Vec<StartAnalysisRequest>>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl RecognitionProvider for RecordingProvider {
        async fn start_analysis(
            &self,
            request: &StartAnalysisRequest,
        ) -> Result<String, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.started.lock().unwrap().push(request.clone());
            Ok("job-1".to_string())
        }

        async fn fetch_results(
            &self,
            _job_id: &str,
            _analysis_type: AnalysisType,
        ) -> Result<serde_json::Value, ProviderError> {
            unreachable!("not used by the submitter")
        }

        async fn detect_image(
            &self,
            _request: &DetectImageRequest,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!({"Labels": []}))
        }
    }

    fn config() -> RecognitionConfig {
        RecognitionConfig {
            disk: "s3".to_string(),
            buckets: parse_buckets("s3=media-prod"),
            iam_arn: Some("arn:aws:iam::123456789012:role/rekognition".to_string()),
            sns_topic_arn: Some("arn:aws:sns:us-east-1:123456789012:rekognition".to_string()),
            min_confidence: 55.0,
        }
    }

    fn request(analysis_type: AnalysisType) -> SubmissionRequest {
        SubmissionRequest {
            media_id: 42,
            analysis_type,
            disk: None,
            path: "videos/cat.mp4".to_string(),
            options: AnalysisOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_submit_builds_provider_request() {
        let provider = Arc::new(RecordingProvider::default());
        let submitter = AnalysisSubmitter::new(config(), provider.clone());

        let submission = submitter.submit(&request(AnalysisType::Labels), None).await.unwrap();
        assert_eq!(submission.job_id, "job-1");
        assert!(submission.client_token.starts_with("labels_42_"));

        let started = provider.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].source.bucket, "media-prod");
        assert_eq!(started[0].source.name, "videos/cat.mp4");
        assert_eq!(started[0].client_token, submission.client_token);
        assert_eq!(
            started[0].options,
            TypeOptions::Labels {
                min_confidence: 55.0,
                max_labels: None
            }
        );
    }

    #[tokio::test]
    async fn test_submit_without_bucket_never_calls_provider() {
        let provider = Arc::new(RecordingProvider::default());
        let mut config = config();
        config.buckets.clear();
        let submitter = AnalysisSubmitter::new(config, provider.clone());

        let err = submitter.submit(&request(AnalysisType::Faces), None).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Configuration(ConfigurationError::MissingBucket(_))
        ));
        assert!(provider.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_role_never_calls_provider() {
        let provider = Arc::new(RecordingProvider::default());
        let mut config = config();
        config.iam_arn = None;
        let submitter = AnalysisSubmitter::new(config, provider.clone());

        let err = submitter.submit(&request(AnalysisType::Labels), None).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Configuration(ConfigurationError::MissingRoleArn)
        ));
        assert!(provider.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_respects_timeout() {
        let provider = Arc::new(RecordingProvider {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let submitter = AnalysisSubmitter::new(config(), provider);

        let err = submitter
            .submit(&request(AnalysisType::Labels), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Provider(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn test_type_options_use_request_overrides() {
        let submitter = AnalysisSubmitter::new(config(), Arc::new(RecordingProvider::default()));
        let options = AnalysisOptions {
            min_confidence: Some(90.0),
            face_attributes: Some(FaceAttributes::All),
            min_bounding_box_height: Some(0.1),
            ..Default::default()
        };

        assert_eq!(
            submitter.type_options(AnalysisType::Faces, &options),
            TypeOptions::Faces {
                attributes: FaceAttributes::All
            }
        );
        assert_eq!(
            submitter.type_options(AnalysisType::TextDetection, &options),
            TypeOptions::TextDetection {
                filters: TextFilters {
                    min_confidence: Some(90.0),
                    min_bounding_box_height: Some(0.1),
                    min_bounding_box_width: None,
                }
            }
        );
    }
}
