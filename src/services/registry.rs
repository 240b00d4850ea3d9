use async_trait::async_trait;

use crate::models::job::{AnalysisJob, NewAnalysisJob};

/// Durable mapping from provider job ids to the media they analyze.
///
/// Submission and webhook handling may run in different processes, so the
/// production implementation must be backed by shared storage.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Record a submitted job. Registering the same job id again replaces the
    /// correlation but keeps its registration sequence.
    async fn register(&self, job: NewAnalysisJob) -> Result<AnalysisJob, RegistryError>;

    /// Look up the job a provider notification refers to.
    async fn resolve(&self, job_id: &str) -> Result<AnalysisJob, RegistryError>;

    /// Move a pending job to `completed`. Returns false if it was already terminal.
    async fn mark_completed(&self, job_id: &str) -> Result<bool, RegistryError>;

    /// Move a pending job to `failed`. Returns false if it was already terminal.
    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool, RegistryError>;

    async fn increment_retry_count(&self, job_id: &str) -> Result<i32, RegistryError>;

    async fn ping(&self) -> Result<(), RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown analysis job: {0}")]
    UnknownJob(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}
