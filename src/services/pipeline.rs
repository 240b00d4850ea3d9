use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AnalysisError;
use crate::models::job::{AnalysisJob, NewAnalysisJob};
use crate::models::media::{MediaKind, MediaRecord, MergeOutcome};
use crate::models::requests::AnalysisRequest;
use crate::services::media_store::MediaStore;
use crate::services::merger::ResultMerger;
use crate::services::provider::{ProviderError, RecognitionProvider};
use crate::services::queue::CompletionTask;
use crate::services::registry::{JobRegistry, RegistryError};
use crate::services::submitter::{AnalysisSubmitter, SubmissionRequest};
use crate::services::token;

/// Prefix for registry entries of synchronous image analyses, which have no
/// provider job id of their own.
const SYNC_JOB_PREFIX: &str = "sync:";

/// What applying one completion task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Merged(MergeOutcome),
    /// The job already reached a terminal state; nothing was fetched.
    AlreadyTerminal,
    /// The provider reported the job as failed.
    ProviderFailed,
}

/// Coordinates submission, registration, result retrieval, and merging.
pub struct AnalysisPipeline {
    submitter: AnalysisSubmitter,
    registry: Arc<dyn JobRegistry>,
    media: Arc<dyn MediaStore>,
    provider: Arc<dyn RecognitionProvider>,
    merger: ResultMerger,
    provider_timeout: Duration,
}

impl AnalysisPipeline {
    pub fn new(
        submitter: AnalysisSubmitter,
        registry: Arc<dyn JobRegistry>,
        media: Arc<dyn MediaStore>,
        provider: Arc<dyn RecognitionProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            submitter,
            merger: ResultMerger::new(media.clone()),
            registry,
            media,
            provider,
            provider_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    pub fn media(&self) -> &Arc<dyn MediaStore> {
        &self.media
    }

    /// Submit an asynchronous video analysis job and register it.
    pub async fn start_analysis(
        &self,
        media_id: i64,
        request: &AnalysisRequest,
    ) -> Result<AnalysisJob, AnalysisError> {
        let media = self.load_media(media_id).await?;
        if media.kind != MediaKind::Video {
            return Err(AnalysisError::Validation(format!(
                "media {} is an image; use synchronous detection",
                media_id
            )));
        }

        let submission_request = submission_request(&media, request);
        let submission = self
            .submitter
            .submit(&submission_request, Some(self.provider_timeout))
            .await?;

        let job = self
            .registry
            .register(NewAnalysisJob {
                job_id: submission.job_id,
                client_token: submission.client_token,
                media_id,
                analysis_type: request.analysis_type,
            })
            .await?;

        self.media
            .update_job_id(media_id, &job.job_id, request.analysis_type)
            .await?;

        metrics::counter!(
            "analysis_jobs_submitted_total",
            "analysis_type" => request.analysis_type.as_str()
        )
        .increment(1);

        tracing::info!(
            media_id,
            job_id = %job.job_id,
            analysis_type = %job.analysis_type,
            sequence = job.sequence,
            "Analysis job registered"
        );

        Ok(job)
    }

    /// Analyze an image synchronously and merge the result right away.
    pub async fn analyze_image(
        &self,
        media_id: i64,
        request: &AnalysisRequest,
    ) -> Result<(AnalysisJob, MergeOutcome), AnalysisError> {
        let media = self.load_media(media_id).await?;
        if media.kind != MediaKind::Image {
            return Err(AnalysisError::Validation(format!(
                "media {} is a video; submit an asynchronous analysis",
                media_id
            )));
        }

        let submission_request = submission_request(&media, request);
        let raw = self
            .submitter
            .detect_image(&submission_request, Some(self.provider_timeout))
            .await?;

        let client_token = token::generate(request.analysis_type, media_id);
        let job = self
            .registry
            .register(NewAnalysisJob {
                job_id: format!("{}{}", SYNC_JOB_PREFIX, client_token),
                client_token,
                media_id,
                analysis_type: request.analysis_type,
            })
            .await?;

        let outcome = match self
            .merger
            .merge(media_id, request.analysis_type, &raw, &job.applied())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.registry.mark_failed(&job.job_id, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        self.registry.mark_completed(&job.job_id).await?;
        self.media
            .update_job_id(media_id, &job.job_id, request.analysis_type)
            .await?;

        metrics::counter!(
            "analysis_jobs_completed_total",
            "analysis_type" => request.analysis_type.as_str()
        )
        .increment(1);

        Ok((job, outcome))
    }

    /// Fetch and merge the results of a job the provider reported as done.
    ///
    /// Completions for jobs that are already terminal are skipped without
    /// contacting the provider, so duplicate deliveries fetch once.
    pub async fn apply_completion(
        &self,
        task: &CompletionTask,
    ) -> Result<CompletionOutcome, AnalysisError> {
        let job = self.registry.resolve(&task.job_id).await?;

        if job.status.is_terminal() {
            tracing::info!(
                job_id = %job.job_id,
                status = %job.status,
                message_id = %task.message_id,
                "Ignoring completion for finished job"
            );
            return Ok(CompletionOutcome::AlreadyTerminal);
        }

        if !task.status.succeeded() {
            self.fail_job(&job, &format!("Provider reported {:?}", task.status))
                .await?;
            return Ok(CompletionOutcome::ProviderFailed);
        }

        let start = Instant::now();
        let raw = tokio::time::timeout(
            self.provider_timeout,
            self.provider.fetch_results(&job.job_id, job.analysis_type),
        )
        .await
        .map_err(|_| ProviderError::Timeout)??;
        metrics::histogram!(
            "analysis_result_fetch_seconds",
            "analysis_type" => job.analysis_type.as_str()
        )
        .record(start.elapsed().as_secs_f64());

        let outcome = self
            .merger
            .merge(job.media_id, job.analysis_type, &raw, &job.applied())
            .await?;

        self.registry.mark_completed(&job.job_id).await?;
        metrics::counter!(
            "analysis_jobs_completed_total",
            "analysis_type" => job.analysis_type.as_str()
        )
        .increment(1);

        Ok(CompletionOutcome::Merged(outcome))
    }

    /// Record a failed attempt at applying `task`.
    ///
    /// Returns true when the job was given up on and marked failed.
    pub async fn record_failure(
        &self,
        task: &CompletionTask,
        error: &AnalysisError,
        max_retries: i32,
    ) -> Result<bool, AnalysisError> {
        let job = match self.registry.resolve(&task.job_id).await {
            Ok(job) => job,
            Err(RegistryError::UnknownJob(_)) => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        if !error.is_retryable() {
            self.fail_job(&job, &error.to_string()).await?;
            return Ok(true);
        }

        let retry_count = self.registry.increment_retry_count(&job.job_id).await?;
        if retry_count >= max_retries {
            self.fail_job(
                &job,
                &format!("Failed after {} retries: {}", max_retries, error),
            )
            .await?;
            tracing::warn!(job_id = %job.job_id, retry_count, "Job failed after max retries");
            return Ok(true);
        }

        tracing::info!(job_id = %job.job_id, retry_count, "Job will be retried");
        Ok(false)
    }

    pub async fn job(&self, job_id: &str) -> Result<AnalysisJob, AnalysisError> {
        Ok(self.registry.resolve(job_id).await?)
    }

    pub async fn load_media(&self, media_id: i64) -> Result<MediaRecord, AnalysisError> {
        self.media
            .get_media(media_id)
            .await?
            .ok_or(AnalysisError::UnknownMedia(media_id))
    }

    async fn fail_job(&self, job: &AnalysisJob, error: &str) -> Result<(), AnalysisError> {
        if self.registry.mark_failed(&job.job_id, error).await? {
            metrics::counter!(
                "analysis_jobs_failed_total",
                "analysis_type" => job.analysis_type.as_str()
            )
            .increment(1);
            tracing::warn!(
                job_id = %job.job_id,
                media_id = job.media_id,
                analysis_type = %job.analysis_type,
                error,
                "Analysis job failed"
            );
        }
        Ok(())
    }
}

/// Resolve the object location from the request, falling back to the record.
fn submission_request(media: &MediaRecord, request: &AnalysisRequest) -> SubmissionRequest {
    SubmissionRequest {
        media_id: media.id,
        analysis_type: request.analysis_type,
        disk: Some(request.disk.clone().unwrap_or_else(|| media.disk.clone())),
        path: request.path.clone().unwrap_or_else(|| media.path.clone()),
        options: request.options.clone(),
    }
}
