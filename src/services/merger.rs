use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::models::analysis::{
    AgeRange, AnalysisResult, AnalysisType, BoundingBox, DetectedFace, DetectedLabel,
    ModerationLabel, TextDetection,
};
use crate::models::job::AppliedJob;
use crate::models::media::MergeOutcome;
use crate::services::media_store::{MediaStore, StoreError};

/// Writes normalized provider results into media records.
pub struct ResultMerger {
    media: Arc<dyn MediaStore>,
}

impl ResultMerger {
    pub fn new(media: Arc<dyn MediaStore>) -> Self {
        Self { media }
    }

    /// Normalize `raw` and store it under `analysis_type` for `media_id`.
    ///
    /// Other analysis types on the record are never touched. A result from a
    /// job registered before the one already stored is skipped.
    pub async fn merge(
        &self,
        media_id: i64,
        analysis_type: AnalysisType,
        raw: &Value,
        applied: &AppliedJob,
    ) -> Result<MergeOutcome, MergeError> {
        let result = normalize(analysis_type, raw)?;

        let outcome = self
            .media
            .update_analysis_results(media_id, &result, applied)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => MergeError::UnknownMedia(id),
                other => MergeError::Store(other),
            })?;

        match &outcome {
            MergeOutcome::Applied => tracing::info!(
                media_id,
                analysis_type = %analysis_type,
                job_id = %applied.job_id,
                items = result.len(),
                "Merged analysis result"
            ),
            MergeOutcome::Stale { current } => tracing::warn!(
                media_id,
                analysis_type = %analysis_type,
                job_id = %applied.job_id,
                current_job_id = %current.job_id,
                "Skipped result from an older job"
            ),
        }

        Ok(outcome)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Media {0} not found")]
    UnknownMedia(i64),

    #[error("Malformed provider result: {0}")]
    Malformed(String),

    #[error("Media store error: {0}")]
    Store(StoreError),
}

/// Convert a raw provider response into the typed result for `analysis_type`.
///
/// Accepts both video `Get*` responses, whose items wrap the detection
/// together with a `Timestamp`, and image `Detect*` responses.
pub fn normalize(analysis_type: AnalysisType, raw: &Value) -> Result<AnalysisResult, MergeError> {
    let items = result_items(analysis_type, raw)?;

    Ok(match analysis_type {
        AnalysisType::Labels => AnalysisResult::Labels(
            items
                .iter()
                .map(|item| unwrap_item::<RawLabel>(item, "Label").map(RawLabel::into_label))
                .collect::<Result<_, _>>()?,
        ),
        AnalysisType::Faces => AnalysisResult::Faces(
            items
                .iter()
                .map(|item| unwrap_item::<RawFace>(item, "Face").map(RawFace::into_face))
                .collect::<Result<_, _>>()?,
        ),
        AnalysisType::Moderation => AnalysisResult::Moderation(
            items
                .iter()
                .map(|item| {
                    unwrap_item::<RawModerationLabel>(item, "ModerationLabel")
                        .map(RawModerationLabel::into_label)
                })
                .collect::<Result<_, _>>()?,
        ),
        AnalysisType::TextDetection => AnalysisResult::TextDetection(
            items
                .iter()
                .map(|item| {
                    unwrap_item::<RawTextDetection>(item, "TextDetection")
                        .map(RawTextDetection::into_detection)
                })
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// Locate the item list: a full response object, or a bare list of items.
fn result_items(analysis_type: AnalysisType, raw: &Value) -> Result<&Vec<Value>, MergeError> {
    if let Value::Array(items) = raw {
        return Ok(items);
    }

    let keys = [
        analysis_type.video_result_key(),
        analysis_type.image_result_key(),
    ];
    for key in keys {
        match raw.get(key) {
            Some(Value::Array(items)) => return Ok(items),
            Some(_) => return Err(MergeError::Malformed(format!("'{}' is not a list", key))),
            None => continue,
        }
    }

    Err(MergeError::Malformed(format!(
        "no '{}' list in {} result",
        analysis_type.video_result_key(),
        analysis_type
    )))
}

/// Deserialize one item, unwrapping the `{Timestamp, <wrapper>: {...}}` video shape.
fn unwrap_item<T>(item: &Value, wrapper: &str) -> Result<(T, Option<i64>), MergeError>
where
    T: DeserializeOwned,
{
    let timestamp = item.get("Timestamp").and_then(Value::as_i64);
    let inner = item.get(wrapper).unwrap_or(item);
    let parsed = T::deserialize(inner)
        .map_err(|e| MergeError::Malformed(format!("{}: {}", wrapper, e)))?;
    Ok((parsed, timestamp))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawLabel {
    name: String,
    confidence: f64,
    #[serde(default)]
    parents: Vec<RawParent>,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawParent {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    bounding_box: Option<BoundingBox>,
}

impl RawLabel {
    fn into_label((raw, timestamp): (Self, Option<i64>)) -> DetectedLabel {
        DetectedLabel {
            name: raw.name,
            confidence: raw.confidence,
            timestamp,
            parents: raw.parents.into_iter().map(|p| p.name).collect(),
            instances: raw
                .instances
                .into_iter()
                .filter_map(|i| i.bounding_box)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFace {
    confidence: f64,
    bounding_box: Option<BoundingBox>,
    age_range: Option<AgeRange>,
    #[serde(default)]
    emotions: Vec<RawEmotion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEmotion {
    #[serde(rename = "Type")]
    kind: String,
    confidence: f64,
}

impl RawFace {
    fn into_face((raw, timestamp): (Self, Option<i64>)) -> DetectedFace {
        let emotion = raw
            .emotions
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|e| e.kind);
        DetectedFace {
            confidence: raw.confidence,
            timestamp,
            bounding_box: raw.bounding_box,
            age_range: raw.age_range,
            emotion,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawModerationLabel {
    name: String,
    confidence: f64,
    #[serde(default)]
    parent_name: Option<String>,
}

impl RawModerationLabel {
    fn into_label((raw, timestamp): (Self, Option<i64>)) -> ModerationLabel {
        ModerationLabel {
            name: raw.name,
            confidence: raw.confidence,
            // Top-level categories carry an empty parent
            parent_name: raw.parent_name.filter(|p| !p.is_empty()),
            timestamp,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTextDetection {
    detected_text: String,
    #[serde(rename = "Type")]
    kind: String,
    confidence: f64,
    id: Option<u32>,
    parent_id: Option<u32>,
}

impl RawTextDetection {
    fn into_detection((raw, timestamp): (Self, Option<i64>)) -> TextDetection {
        TextDetection {
            detected_text: raw.detected_text,
            kind: raw.kind,
            confidence: raw.confidence,
            id: raw.id,
            parent_id: raw.parent_id,
            timestamp,
        }
    }
}
