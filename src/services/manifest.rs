use crate::models::frame::FrameRef;

/// Parse an item manifest: whitespace-separated `frameKey:timestampMillis`
/// entries. An empty manifest yields no frames.
pub fn parse_manifest(raw: &str) -> Result<Vec<FrameRef>, ManifestError> {
    raw.split_whitespace().map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Result<FrameRef, ManifestError> {
    // Keys may contain ':' themselves; the timestamp is always last.
    let (key, timestamp) = entry
        .rsplit_once(':')
        .ok_or_else(|| ManifestError::MissingTimestamp(entry.to_string()))?;

    if key.is_empty() {
        return Err(ManifestError::MissingKey(entry.to_string()));
    }

    let timestamp_ms = timestamp
        .parse::<i64>()
        .map_err(|_| ManifestError::InvalidTimestamp(entry.to_string()))?;

    Ok(FrameRef {
        key: key.to_string(),
        timestamp_ms,
    })
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ManifestError {
    #[error("Manifest entry has no timestamp: {0}")]
    MissingTimestamp(String),

    #[error("Manifest entry has no frame key: {0}")]
    MissingKey(String),

    #[error("Manifest entry has an invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Manifest is not valid UTF-8")]
    Encoding,
}
