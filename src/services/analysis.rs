use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::analysis::{
    DetectLabelsResponse, ImageRef, IndexFacesResponse, SearchFacesResponse,
};
use crate::services::backoff::Retryable;

/// Service error codes worth retrying: throttling, capacity and a
/// collection that may be mid-rollover.
const RETRYABLE_CODES: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
    "ResourceNotFoundException",
];

/// External face/label analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Create an empty face collection named `collection_id`.
    async fn create_collection(&self, collection_id: &str) -> Result<(), AnalysisError>;

    /// Detect faces on `image` and index them into `collection_id`.
    async fn index_faces(
        &self,
        image: &ImageRef,
        collection_id: &str,
        external_image_id: &str,
    ) -> Result<IndexFacesResponse, AnalysisError>;

    async fn detect_labels(
        &self,
        image: &ImageRef,
        min_confidence: f64,
        max_labels: u32,
    ) -> Result<DetectLabelsResponse, AnalysisError>;

    /// Faces in `collection_id` similar to the largest face on `image`.
    async fn search_faces_by_image(
        &self,
        image: &ImageRef,
        collection_id: &str,
        face_match_threshold: f64,
    ) -> Result<SearchFacesResponse, AnalysisError>;
}

/// HTTP client for the analysis service.
pub struct AnalysisClient {
    http: Client,
    endpoint: String,
    api_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateCollectionRequest<'a> {
    collection_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IndexFacesRequest<'a> {
    image: &'a ImageRef,
    collection_id: &'a str,
    external_image_id: &'a str,
    detection_attributes: [&'static str; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DetectLabelsRequest<'a> {
    image: &'a ImageRef,
    min_confidence: f64,
    max_labels: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchFacesRequest<'a> {
    image: &'a ImageRef,
    collection_id: &'a str,
    face_match_threshold: f64,
}

#[derive(Deserialize, Default)]
struct ServiceErrorBody {
    #[serde(default, alias = "__type", alias = "Code")]
    code: String,
    #[serde(default, alias = "Message")]
    message: String,
}

impl AnalysisClient {
    pub fn new(endpoint: &str, api_token: &str) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, AnalysisError>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(service_error(status, &raw));
        }

        let raw = response.bytes().await?;
        if raw.is_empty() {
            return serde_json::from_slice(b"{}").map_err(AnalysisError::Parse);
        }
        serde_json::from_slice(&raw).map_err(AnalysisError::Parse)
    }
}

fn service_error(status: StatusCode, raw: &str) -> AnalysisError {
    let body: ServiceErrorBody = serde_json::from_str(raw).unwrap_or_default();
    // "com.amazon.coral#ThrottlingException" style codes carry a namespace.
    let code = body.code.rsplit('#').next().unwrap_or_default().to_string();
    AnalysisError::Service {
        status: status.as_u16(),
        code,
        message: if body.message.is_empty() {
            raw.to_string()
        } else {
            body.message
        },
    }
}

#[async_trait]
impl AnalysisService for AnalysisClient {
    async fn create_collection(&self, collection_id: &str) -> Result<(), AnalysisError> {
        let _: serde_json::Value = self
            .post("/collections", &CreateCollectionRequest { collection_id })
            .await?;
        Ok(())
    }

    async fn index_faces(
        &self,
        image: &ImageRef,
        collection_id: &str,
        external_image_id: &str,
    ) -> Result<IndexFacesResponse, AnalysisError> {
        self.post(
            "/faces/index",
            &IndexFacesRequest {
                image,
                collection_id,
                external_image_id,
                detection_attributes: ["ALL", "DEFAULT"],
            },
        )
        .await
    }

    async fn detect_labels(
        &self,
        image: &ImageRef,
        min_confidence: f64,
        max_labels: u32,
    ) -> Result<DetectLabelsResponse, AnalysisError> {
        self.post(
            "/labels/detect",
            &DetectLabelsRequest {
                image,
                min_confidence,
                max_labels,
            },
        )
        .await
    }

    async fn search_faces_by_image(
        &self,
        image: &ImageRef,
        collection_id: &str,
        face_match_threshold: f64,
    ) -> Result<SearchFacesResponse, AnalysisError> {
        self.post(
            "/faces/search",
            &SearchFacesRequest {
                image,
                collection_id,
                face_match_threshold,
            },
        )
        .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis service returned {status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to parse analysis response: {0}")]
    Parse(#[source] serde_json::Error),
}

impl AnalysisError {
    pub fn code(&self) -> Option<&str> {
        match self {
            AnalysisError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl Retryable for AnalysisError {
    fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Service { status, code, .. } => {
                RETRYABLE_CODES.contains(&code.as_str())
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
            }
            AnalysisError::Http(e) => e.is_timeout(),
            AnalysisError::Parse(_) => false,
        }
    }
}
