//! HTTP handlers.

use axum::{
    Json,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docqa_rag::{Document, PipelineStats, QueryRequest, QueryResult, RagError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// An error response with body `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        match e {
            RagError::InvalidInput(message) => Self::bad_request(message),
            RagError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Document not found"),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub document_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub document_id: u64,
}

/// GET /
pub async fn index() -> impl IntoResponse {
    Json(json!({ "msg": "Welcome!!!" }))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "docqa" }))
}

/// POST /upload
///
/// Expects a multipart field named `file` holding a PDF.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| ApiError::bad_request("No file part"))?;
    if file_name.trim().is_empty() {
        return Err(ApiError::bad_request("No selected file"));
    }

    let document = state.pipeline.ingest_upload(&file_name, &bytes).await.map_err(|e| {
        warn!(file_name = %file_name, error = %e, "upload failed");
        ApiError::from(e)
    })?;
    info!(document.id = document.id, filename = %document.filename, "upload indexed");

    Ok(Json(UploadResponse {
        success: true,
        message: format!("File {} uploaded and indexed successfully", document.filename),
        document_id: document.id,
    }))
}

/// POST /search
pub async fn search(
    State(state): State<AppState>,
    request: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, ApiError> {
    let Json(request) = request.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let result = state.pipeline.answer(request).await?;
    Ok(Json(result))
}

/// GET /documents
pub async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let documents = state.pipeline.documents().await?;
    Ok(Json(DocumentsResponse { documents }))
}

/// GET /documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state.pipeline.document(id).await?;
    Ok(Json(DocumentResponse { document }))
}

/// DELETE /documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let document = state.pipeline.delete_document(id).await?;
    Ok(Json(DeleteResponse { success: true, document_id: document.id }))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<PipelineStats>, ApiError> {
    Ok(Json(state.pipeline.stats().await?))
}
