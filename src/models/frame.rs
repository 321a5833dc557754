use serde::{Deserialize, Serialize};

/// One extracted frame listed in an item's manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameRef {
    /// Object key of the frame image, e.g. `images/video.mp4/frame-00001.jpg`.
    pub key: String,
    /// Position of the frame in the video, in milliseconds.
    pub timestamp_ms: i64,
}

impl FrameRef {
    /// Last path segment of the object key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Pointer to the stored face records of a frame with at least one face.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameResult {
    pub key: String,
    pub path: String,
    pub time: i64,
}

/// Label names detected on one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameLabels {
    pub key: String,
    pub time: i64,
    pub labels: Vec<String>,
}
