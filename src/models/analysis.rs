use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Kinds of analysis the recognition provider can run on a media object.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    Labels,
    Faces,
    Moderation,
    TextDetection,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Rekognition action that starts an asynchronous (video) job.
    pub fn start_action(&self) -> &'static str {
        match self {
            Self::Labels => "StartLabelDetection",
            Self::Faces => "StartFaceDetection",
            Self::Moderation => "StartContentModeration",
            Self::TextDetection => "StartTextDetection",
        }
    }

    /// Rekognition action that fetches the results of an asynchronous job.
    pub fn get_action(&self) -> &'static str {
        match self {
            Self::Labels => "GetLabelDetection",
            Self::Faces => "GetFaceDetection",
            Self::Moderation => "GetContentModeration",
            Self::TextDetection => "GetTextDetection",
        }
    }

    /// Rekognition action for synchronous image analysis.
    pub fn detect_action(&self) -> &'static str {
        match self {
            Self::Labels => "DetectLabels",
            Self::Faces => "DetectFaces",
            Self::Moderation => "DetectModerationLabels",
            Self::TextDetection => "DetectText",
        }
    }

    /// Key of the item list in a `Get*` response.
    pub fn video_result_key(&self) -> &'static str {
        match self {
            Self::Labels => "Labels",
            Self::Faces => "Faces",
            Self::Moderation => "ModerationLabels",
            Self::TextDetection => "TextDetections",
        }
    }

    /// Key of the item list in a `Detect*` response.
    pub fn image_result_key(&self) -> &'static str {
        match self {
            Self::Faces => "FaceDetails",
            other => other.video_result_key(),
        }
    }

    /// Map the `API` field of a job completion message back to its analysis type.
    pub fn from_start_action(action: &str) -> Option<Self> {
        match action {
            "StartLabelDetection" => Some(Self::Labels),
            "StartFaceDetection" => Some(Self::Faces),
            "StartContentModeration" => Some(Self::Moderation),
            "StartTextDetection" => Some(Self::TextDetection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
}

/// A detected object or concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
    /// Milliseconds from the start of the video; absent for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgeRange {
    pub low: u32,
    pub high: u32,
}

/// A detected face with the attributes the provider returned for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectedFace {
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<AgeRange>,
    /// Dominant emotion, present when all face attributes were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModerationLabel {
    pub name: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextDetection {
    pub detected_text: String,
    /// `LINE` or `WORD`.
    #[serde(rename = "Type")]
    pub kind: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Normalized analysis result, one case per analysis type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum AnalysisResult {
    Labels(Vec<DetectedLabel>),
    Faces(Vec<DetectedFace>),
    Moderation(Vec<ModerationLabel>),
    TextDetection(Vec<TextDetection>),
}

impl AnalysisResult {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            Self::Labels(_) => AnalysisType::Labels,
            Self::Faces(_) => AnalysisType::Faces,
            Self::Moderation(_) => AnalysisType::Moderation,
            Self::TextDetection(_) => AnalysisType::TextDetection,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Labels(items) => items.len(),
            Self::Faces(items) => items.len(),
            Self::Moderation(items) => items.len(),
            Self::TextDetection(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_start_action_round_trip() {
        for analysis_type in AnalysisType::iter() {
            assert_eq!(
                AnalysisType::from_start_action(analysis_type.start_action()),
                Some(analysis_type)
            );
        }
        assert_eq!(AnalysisType::from_start_action("StartPersonTracking"), None);
    }

    #[test]
    fn test_snake_case_names() {
        assert_eq!(AnalysisType::TextDetection.to_string(), "text_detection");
        assert_eq!(AnalysisType::from_str("faces").unwrap(), AnalysisType::Faces);
        assert_eq!(
            serde_json::to_value(AnalysisType::Moderation).unwrap(),
            serde_json::json!("moderation")
        );
    }

    #[test]
    fn test_label_serializes_in_provider_shape() {
        let label = DetectedLabel {
            name: "Cat".to_string(),
            confidence: 98.2,
            timestamp: None,
            parents: vec![],
            instances: vec![],
        };
        assert_eq!(
            serde_json::to_value(&label).unwrap(),
            serde_json::json!({"Name": "Cat", "Confidence": 98.2})
        );
    }
}
