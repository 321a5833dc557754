use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::ImageRef;
use crate::models::job::{JobKind, JobStatus, NO_TOPIC};
use crate::models::search::SearchMatch;
use crate::services::search::SearchError;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    /// Key of the image in the configured bucket.
    #[garde(length(min = 1, max = 1024))]
    pub image_key: String,
    /// Progress topic; omitted means no progress events.
    #[garde(skip)]
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchAccepted {
    pub job_id: Uuid,
    pub items: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub matches: Vec<SearchMatch>,
}

/// POST /api/v1/search: fan an image search out over every collection.
pub async fn submit_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<(StatusCode, Json<SearchAccepted>), StatusCode> {
    request.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let job_id = Uuid::new_v4();
    let image = ImageRef {
        bucket: state.storage.bucket_name().to_string(),
        key: request.image_key,
    };
    let topic = request.topic.unwrap_or_else(|| NO_TOPIC.to_string());

    match state.search.plan(&job_id.to_string(), &topic, image).await {
        Ok(job) => Ok((
            StatusCode::ACCEPTED,
            Json(SearchAccepted {
                job_id,
                items: job.parts.len(),
            }),
        )),
        Err(SearchError::NoCollections) => Err(StatusCode::CONFLICT),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to start search");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/v1/search/{job_id}: status and matches found so far.
pub async fn get_search(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<SearchStatusResponse>, StatusCode> {
    let job_id = job_id.to_string();
    let job = state
        .store
        .get_job(&job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to read search job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .filter(|job| job.kind == JobKind::Search)
        .ok_or(StatusCode::NOT_FOUND)?;

    let matches = state.store.search_matches(&job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to read search matches");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(SearchStatusResponse {
        job_id,
        status: job.status,
        matches,
    }))
}
