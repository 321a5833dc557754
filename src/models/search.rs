use serde::{Deserialize, Serialize};

use super::analysis::ImageRef;

/// Collections searched by one item of a search job.
pub const COLLECTIONS_PER_ITEM: usize = 10;

/// Separates the video id from the frame name in an indexed face's
/// external image id.
const EXTERNAL_ID_SEPARATOR: char = ':';

/// External image id given to faces indexed from `frame_name` of `job_id`.
pub fn external_image_id(job_id: &str, frame_name: &str) -> String {
    format!("{job_id}{EXTERNAL_ID_SEPARATOR}{frame_name}")
}

/// Video a matched face was indexed from, or `None` when the external id
/// was not written by [`external_image_id`].
pub fn video_id(external_image_id: &str) -> Option<&str> {
    external_image_id
        .rsplit_once(EXTERNAL_ID_SEPARATOR)
        .map(|(video, _)| video)
        .filter(|video| !video.is_empty())
}

/// Object key of the `index`-th (1-based) work file of a search job.
pub fn work_file_key(job_id: &str, index: usize) -> String {
    format!("processing/{job_id}/key{index}.json")
}

/// Payload of one search item: the image and the collections to search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchWorkFile {
    pub job_id: String,
    pub image: ImageRef,
    pub collections: Vec<String>,
}

/// One face found similar to the searched image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SearchMatch {
    pub face_id: String,
    pub video_id: String,
    pub image_id: String,
    pub similarity: f64,
    pub collection: String,
}
