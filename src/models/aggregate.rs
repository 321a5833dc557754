use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::analysis::{BooleanAttribute, EmotionType, FaceDetail, Gender};

/// Hash field holding the shard assigned to a job.
pub const SHARD_FIELD: &str = "CollectionId";

/// Hash field counting faces that passed the response threshold.
pub const FACES_FIELD: &str = "NumberFaceDetails";

const FACE_DETAILS_PREFIX: &str = "FaceDetails";
const GENDER_ATTRIBUTE: &str = "Gender";
const EMOTIONS_ATTRIBUTE: &str = "Emotions";
const POSITIVE: &str = "Positive";
const NEGATIVE: &str = "Negative";

/// Boolean face attributes tallied as Positive/Negative.
#[derive(Debug, Clone, Copy, EnumString, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaceAttribute {
    Eyeglasses,
    Sunglasses,
    EyesOpen,
    Smile,
    MouthOpen,
    Mustache,
    Beard,
}

impl FaceAttribute {
    pub const ALL: [FaceAttribute; 7] = [
        FaceAttribute::Eyeglasses,
        FaceAttribute::Sunglasses,
        FaceAttribute::EyesOpen,
        FaceAttribute::Smile,
        FaceAttribute::MouthOpen,
        FaceAttribute::Mustache,
        FaceAttribute::Beard,
    ];

    pub fn read(self, detail: &FaceDetail) -> Option<&BooleanAttribute> {
        match self {
            FaceAttribute::Eyeglasses => detail.eyeglasses.as_ref(),
            FaceAttribute::Sunglasses => detail.sunglasses.as_ref(),
            FaceAttribute::EyesOpen => detail.eyes_open.as_ref(),
            FaceAttribute::Smile => detail.smile.as_ref(),
            FaceAttribute::MouthOpen => detail.mouth_open.as_ref(),
            FaceAttribute::Mustache => detail.mustache.as_ref(),
            FaceAttribute::Beard => detail.beard.as_ref(),
        }
    }
}

/// Typed counter address inside the aggregate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Counter {
    Boolean(FaceAttribute, bool),
    Gender(Gender),
    Emotion(EmotionType),
    FacesDetected,
}

impl Counter {
    /// Storage path, e.g. `FaceDetails.Smile.Positive`.
    pub fn path(&self) -> String {
        match self {
            Counter::Boolean(attribute, positive) => format!(
                "{FACE_DETAILS_PREFIX}.{attribute}.{}",
                if *positive { POSITIVE } else { NEGATIVE }
            ),
            Counter::Gender(gender) => format!("{FACE_DETAILS_PREFIX}.{GENDER_ATTRIBUTE}.{gender}"),
            Counter::Emotion(emotion) => {
                format!("{FACE_DETAILS_PREFIX}.{EMOTIONS_ATTRIBUTE}.{emotion}")
            }
            Counter::FacesDetected => FACES_FIELD.to_string(),
        }
    }

    /// Every counter an aggregate record starts with at zero.
    pub fn all() -> Vec<Counter> {
        let mut counters = Vec::new();
        for attribute in FaceAttribute::ALL {
            counters.push(Counter::Boolean(attribute, true));
            counters.push(Counter::Boolean(attribute, false));
        }
        counters.extend(Gender::TRACKED.into_iter().map(Counter::Gender));
        counters.extend(EmotionType::TRACKED.into_iter().map(Counter::Emotion));
        counters.push(Counter::FacesDetected);
        counters
    }
}

/// Additive update against one job's aggregate record.
///
/// Deltas accumulate per path and only positive deltas are kept, so the
/// store issues a single batched increment touching nothing else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateUpdate {
    counters: BTreeMap<String, i64>,
    labels: BTreeMap<String, i64>,
}

impl AggregateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, counter: Counter, delta: u64) -> &mut Self {
        if delta > 0 {
            *self.counters.entry(counter.path()).or_insert(0) += delta as i64;
        }
        self
    }

    pub fn add_label(&mut self, label: &str, delta: u64) -> &mut Self {
        if delta > 0 {
            *self.labels.entry(label.to_string()).or_insert(0) += delta as i64;
        }
        self
    }

    pub fn counters(&self) -> &BTreeMap<String, i64> {
        &self.counters
    }

    pub fn labels(&self) -> &BTreeMap<String, i64> {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.labels.is_empty()
    }
}

/// Running per-job totals over every analysed frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultAggregate {
    pub shard_id: String,
    pub counters: BTreeMap<String, u64>,
    pub detected_labels: BTreeMap<String, u64>,
}

impl ResultAggregate {
    /// Field/value pairs of a freshly initialised record.
    pub fn zeroed_fields(shard_id: &str) -> Vec<(String, String)> {
        let mut fields = vec![(SHARD_FIELD.to_string(), shard_id.to_string())];
        fields.extend(Counter::all().into_iter().map(|c| (c.path(), "0".to_string())));
        fields
    }

    /// Rebuild from raw hash fields; unparsable counters read as zero.
    pub fn from_fields(fields: HashMap<String, String>, labels: HashMap<String, i64>) -> Self {
        let mut aggregate = ResultAggregate::default();
        for (field, value) in fields {
            if field == SHARD_FIELD {
                aggregate.shard_id = value;
            } else {
                aggregate
                    .counters
                    .insert(field, value.parse::<u64>().unwrap_or_default());
            }
        }
        aggregate.detected_labels = labels
            .into_iter()
            .map(|(label, count)| (label, count.max(0) as u64))
            .collect();
        aggregate
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.counters.get(&counter.path()).copied().unwrap_or(0)
    }

    pub fn faces_detected(&self) -> u64 {
        self.count(Counter::FacesDetected)
    }
}
