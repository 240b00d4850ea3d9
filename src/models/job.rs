use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::analysis::AnalysisType;

/// Status of a provider analysis job as tracked locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Correlation record between a provider job and the media it analyzes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    /// Registration order; later registrations win when results race.
    pub sequence: i64,
    pub job_id: String,
    pub client_token: String,
    pub media_id: i64,
    pub analysis_type: AnalysisType,
    pub status: JobStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn applied(&self) -> AppliedJob {
        AppliedJob {
            job_id: self.job_id.clone(),
            sequence: self.sequence,
        }
    }
}

/// Helper for registering a freshly submitted job
#[derive(Debug, Clone)]
pub struct NewAnalysisJob {
    pub job_id: String,
    pub client_token: String,
    pub media_id: i64,
    pub analysis_type: AnalysisType,
}

/// Identity of the job whose result is currently stored for one analysis type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedJob {
    pub job_id: String,
    pub sequence: i64,
}
