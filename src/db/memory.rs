//! In-process registry and media store.
//!
//! Only suitable when submission and webhook handling share one process
//! (tests, local development). Production deployments use the Postgres
//! implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::job::{AnalysisJob, AppliedJob, JobStatus, NewAnalysisJob};
use crate::models::media::{MediaAnalysisResults, MediaKind, MediaRecord, MergeOutcome};
use crate::services::media_store::{MediaStore, StoreError};
use crate::services::registry::{JobRegistry, RegistryError};

#[derive(Default)]
pub struct MemoryJobRegistry {
    jobs: Mutex<HashMap<String, AnalysisJob>>,
    sequence: AtomicI64,
}

impl MemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<bool, RegistryError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::UnknownJob(job_id.to_string()))?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.error = error.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn register(&self, job: NewAnalysisJob) -> Result<AnalysisJob, RegistryError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let record = match jobs.get_mut(&job.job_id) {
            Some(existing) => {
                existing.client_token = job.client_token;
                existing.media_id = job.media_id;
                existing.analysis_type = job.analysis_type;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let record = AnalysisJob {
                    id: Uuid::new_v4(),
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                    job_id: job.job_id.clone(),
                    client_token: job.client_token,
                    media_id: job.media_id,
                    analysis_type: job.analysis_type,
                    status: JobStatus::Pending,
                    retry_count: 0,
                    error: None,
                    created_at: now,
                    updated_at: now,
                };
                jobs.insert(job.job_id, record.clone());
                record
            }
        };

        Ok(record)
    }

    async fn resolve(&self, job_id: &str) -> Result<AnalysisJob, RegistryError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownJob(job_id.to_string()))
    }

    async fn mark_completed(&self, job_id: &str) -> Result<bool, RegistryError> {
        self.transition(job_id, JobStatus::Completed, None)
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool, RegistryError> {
        self.transition(job_id, JobStatus::Failed, Some(error))
    }

    async fn increment_retry_count(&self, job_id: &str) -> Result<i32, RegistryError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::UnknownJob(job_id.to_string()))?;
        job.retry_count += 1;
        Ok(job.retry_count)
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMediaStore {
    media: Mutex<HashMap<i64, MediaRecord>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a media record, standing in for the owning application.
    pub fn insert(&self, id: i64, disk: &str, path: &str, kind: MediaKind) {
        self.media.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            MediaRecord {
                id,
                disk: disk.to_string(),
                path: path.to_string(),
                kind,
                analysis: MediaAnalysisResults::default(),
            },
        );
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn get_media(&self, media_id: i64) -> Result<Option<MediaRecord>, StoreError> {
        Ok(self
            .media
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&media_id)
            .cloned())
    }

    async fn update_analysis_results(
        &self,
        media_id: i64,
        result: &AnalysisResult,
        applied: &AppliedJob,
    ) -> Result<MergeOutcome, StoreError> {
        let mut media = self.media.lock().unwrap_or_else(|e| e.into_inner());
        let record = media.get_mut(&media_id).ok_or(StoreError::NotFound(media_id))?;
        let analysis_type = result.analysis_type();

        if let Some(current) = record.analysis.applied.get(&analysis_type) {
            if current.sequence > applied.sequence {
                return Ok(MergeOutcome::Stale {
                    current: current.clone(),
                });
            }
        }

        record.analysis.results.insert(analysis_type, result.clone());
        record.analysis.applied.insert(analysis_type, applied.clone());
        Ok(MergeOutcome::Applied)
    }

    async fn update_job_id(
        &self,
        media_id: i64,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<(), StoreError> {
        let mut media = self.media.lock().unwrap_or_else(|e| e.into_inner());
        let record = media.get_mut(&media_id).ok_or(StoreError::NotFound(media_id))?;
        record.analysis.job_ids.insert(analysis_type, job_id.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
