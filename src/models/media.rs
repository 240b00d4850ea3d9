use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::job::AppliedJob;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Media record as seen by the analysis service.
///
/// Rows are created by the owning application; this service only reads the
/// location and updates the analysis columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: i64,
    /// Storage disk the object lives on; mapped to a bucket by configuration.
    pub disk: String,
    /// Object key within the bucket.
    pub path: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub analysis: MediaAnalysisResults,
}

/// Per-type analysis state of a media record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaAnalysisResults {
    pub results: HashMap<AnalysisType, AnalysisResult>,
    pub applied: HashMap<AnalysisType, AppliedJob>,
    pub job_ids: HashMap<AnalysisType, String>,
}

/// What happened to a result handed to the media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// A newer job's result is already stored for this type.
    Stale { current: AppliedJob },
}
