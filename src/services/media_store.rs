use async_trait::async_trait;

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::job::AppliedJob;
use crate::models::media::{MediaRecord, MergeOutcome};

/// Access to the media records owned by the application.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn get_media(&self, media_id: i64) -> Result<Option<MediaRecord>, StoreError>;

    /// Store `result` under its analysis type unless a newer job already
    /// wrote that type. The check and the write happen atomically.
    async fn update_analysis_results(
        &self,
        media_id: i64,
        result: &AnalysisResult,
        applied: &AppliedJob,
    ) -> Result<MergeOutcome, StoreError>;

    /// Remember the latest submitted job for one analysis type.
    async fn update_job_id(
        &self,
        media_id: i64,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Media {0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt media record: {0}")]
    Corrupt(String),
}
