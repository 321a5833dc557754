use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Reference to an image already stored in the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub bucket: String,
    pub key: String,
}

/// Response of the face indexing call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexFacesResponse {
    #[serde(default)]
    pub face_records: Vec<FaceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<IndexedFace>,
    pub face_detail: FaceDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexedFace {
    pub face_id: String,
    #[serde(default)]
    pub external_image_id: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceDetail {
    pub confidence: f64,
    #[serde(default)]
    pub smile: Option<BooleanAttribute>,
    #[serde(default)]
    pub eyeglasses: Option<BooleanAttribute>,
    #[serde(default)]
    pub sunglasses: Option<BooleanAttribute>,
    #[serde(default)]
    pub eyes_open: Option<BooleanAttribute>,
    #[serde(default)]
    pub mouth_open: Option<BooleanAttribute>,
    #[serde(default)]
    pub mustache: Option<BooleanAttribute>,
    #[serde(default)]
    pub beard: Option<BooleanAttribute>,
    #[serde(default)]
    pub gender: Option<GenderAttribute>,
    #[serde(default)]
    pub emotions: Vec<Emotion>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BooleanAttribute {
    pub value: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GenderAttribute {
    pub value: Gender,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Gender {
    Male,
    Female,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Emotion {
    #[serde(rename = "Type")]
    pub kind: EmotionType,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionType {
    Happy,
    Sad,
    Angry,
    Disgusted,
    Confused,
    Surprised,
    Calm,
    /// Emotion types the aggregate does not track (e.g. FEAR).
    #[serde(other)]
    Unknown,
}

impl Gender {
    pub const TRACKED: [Gender; 2] = [Gender::Male, Gender::Female];
}

impl EmotionType {
    pub const TRACKED: [EmotionType; 7] = [
        EmotionType::Happy,
        EmotionType::Sad,
        EmotionType::Angry,
        EmotionType::Disgusted,
        EmotionType::Confused,
        EmotionType::Surprised,
        EmotionType::Calm,
    ];
}

/// Response of the label detection call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectLabelsResponse {
    #[serde(default)]
    pub labels: Vec<DetectedLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
}

/// Response of searching one collection for faces matching an image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchFacesResponse {
    #[serde(default)]
    pub face_matches: Vec<FaceMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceMatch {
    pub similarity: f64,
    pub face: IndexedFace,
}
