//! Synthetic jobs, manifests and detection results.

#![allow(dead_code)]

use frame_fanout::models::analysis::{
    BooleanAttribute, DetectedLabel, Emotion, EmotionType, FaceDetail, FaceRecord, Gender,
    GenderAttribute, IndexedFace,
};
use frame_fanout::models::job::{JobKind, JobRecord};
use frame_fanout::models::search::work_file_key;

pub const VIDEO: &str = "video.mp4";

/// Object key of frame `n` of the test video.
pub fn frame_key(n: u32) -> String {
    format!("images/{VIDEO}/frame-{n:05}.jpg")
}

/// Manifest listing frames `range`, one second apart.
pub fn manifest(range: std::ops::Range<u32>) -> String {
    range
        .map(|n| format!("{}:{}", frame_key(n), n * 1000))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Job with `count` items named `images/video.mp4/part-XX.txt`.
pub fn job(topic: &str, count: usize) -> JobRecord {
    JobRecord::new(VIDEO, topic, item_keys(count))
}

pub const SEARCH_JOB: &str = "3f0c2d4e-search";

/// Search job with `count` work files.
pub fn search_job(topic: &str, count: usize) -> JobRecord {
    JobRecord::new(
        SEARCH_JOB,
        topic,
        (1..=count).map(|n| work_file_key(SEARCH_JOB, n)),
    )
    .with_kind(JobKind::Search)
}

pub fn item_keys(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("images/{VIDEO}/part-{i:02}.txt"))
        .collect()
}

/// Confident face with a smile attribute and a dominant emotion.
pub fn smiling_face(face_id: &str, smiling: bool) -> FaceRecord {
    FaceRecord {
        face: Some(IndexedFace {
            face_id: face_id.to_string(),
            external_image_id: Some(VIDEO.to_string()),
            confidence: 99.9,
        }),
        face_detail: FaceDetail {
            confidence: 99.5,
            smile: Some(BooleanAttribute {
                value: smiling,
                confidence: 96.0,
            }),
            eyes_open: Some(BooleanAttribute {
                value: true,
                confidence: 80.0,
            }),
            gender: Some(GenderAttribute {
                value: Gender::Male,
                confidence: 99.0,
            }),
            emotions: vec![
                Emotion {
                    kind: EmotionType::Happy,
                    confidence: if smiling { 97.0 } else { 10.0 },
                },
                Emotion {
                    kind: EmotionType::Calm,
                    confidence: if smiling { 30.0 } else { 93.0 },
                },
            ],
            ..FaceDetail::default()
        },
    }
}

/// Face the detector itself is unsure about; never counted.
pub fn blurry_face(face_id: &str) -> FaceRecord {
    let mut record = smiling_face(face_id, true);
    record.face_detail.confidence = 80.0;
    record
}

pub fn label(name: &str) -> DetectedLabel {
    DetectedLabel {
        name: name.to_string(),
        confidence: 95.0,
    }
}
