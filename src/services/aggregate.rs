use crate::models::aggregate::{AggregateUpdate, Counter, FaceAttribute};
use crate::models::analysis::{DetectedLabel, Emotion, EmotionType, FaceRecord, Gender};

/// Confidence gates applied when tallying face results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// A face is only counted when the detection itself is above this.
    pub face_response: f64,
    /// Each attribute of a counted face must be above this.
    pub attribute: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            face_response: 95.0,
            attribute: 90.0,
        }
    }
}

/// Add the attribute tallies of `records` to `update`; returns the number
/// of faces that passed the response gate.
///
/// FacesDetected counts every face past the response gate, including faces
/// where no attribute cleared the attribute threshold and no other counter
/// moved.
pub fn summarize_faces<'a>(
    update: &mut AggregateUpdate,
    records: impl IntoIterator<Item = &'a FaceRecord>,
    thresholds: &Thresholds,
) -> u64 {
    let mut faces = 0;

    for record in records {
        let detail = &record.face_detail;
        if detail.confidence <= thresholds.face_response {
            continue;
        }

        for attribute in FaceAttribute::ALL {
            if let Some(value) = attribute.read(detail) {
                if value.confidence > thresholds.attribute {
                    update.add(Counter::Boolean(attribute, value.value), 1);
                }
            }
        }

        if let Some(gender) = &detail.gender {
            if gender.confidence > thresholds.attribute && gender.value != Gender::Unknown {
                update.add(Counter::Gender(gender.value), 1);
            }
        }

        if let Some(emotion) = dominant_emotion(&detail.emotions, thresholds.attribute) {
            update.add(Counter::Emotion(emotion), 1);
        }

        faces += 1;
    }

    update.add(Counter::FacesDetected, faces);
    faces
}

/// Highest-confidence emotion above `threshold`. Ties keep the first seen;
/// untracked types are dropped after selection.
pub fn dominant_emotion(emotions: &[Emotion], threshold: f64) -> Option<EmotionType> {
    let mut selected: Option<&Emotion> = None;
    for emotion in emotions {
        if emotion.confidence <= threshold {
            continue;
        }
        match selected {
            Some(best) if emotion.confidence <= best.confidence => {}
            _ => selected = Some(emotion),
        }
    }

    selected
        .map(|emotion| emotion.kind)
        .filter(|kind| *kind != EmotionType::Unknown)
}

/// One occurrence per label per frame.
pub fn summarize_labels<'a>(
    update: &mut AggregateUpdate,
    labels: impl IntoIterator<Item = &'a DetectedLabel>,
) {
    for label in labels {
        update.add_label(&label.name, 1);
    }
}
