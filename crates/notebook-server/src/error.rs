use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notebook_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Classify a store error for a request addressing note `id`.
    pub fn from_store(err: StoreError, id: &str) -> Self {
        match err {
            StoreError::NotFound => ServerError::NoteNotFound(id.to_string()),
            StoreError::Conflict(msg) => ServerError::Conflict(msg),
            StoreError::Validation(msg) => ServerError::Validation(msg),
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NoteNotFound(_) | ServerError::BlobNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Conflict(_)
            | ServerError::Validation(_)
            | ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ServerError::BlobStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Blob storage error".to_string())
            }
            ServerError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
