use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use notebook_store::{Database, Note, NotePatch, Page};

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub notes: Arc<Mutex<Database>>,
    pub images: Arc<BlobStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    fn notes(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.notes
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {e}")))
    }
}

/// Unwrap a JSON body. A request without any `content-type` is a client
/// mistake (400); one that names a different media type is 415.
fn json_body<T>(
    headers: &HeaderMap,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ServerError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(rejection)) => {
            match headers.get(header::CONTENT_TYPE) {
                None => Err(ServerError::BadRequest(
                    "header 'content-type' is unset".to_string(),
                )),
                Some(_) => Err(ServerError::UnsupportedMediaType(rejection.body_text())),
            }
        }
        Err(rejection) => Err(ServerError::BadRequest(rejection.body_text())),
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notebook", get(list_notes).post(create_note))
        .route("/api/v1/notebook/", get(list_notes).post(create_note))
        .route(
            "/api/v1/notebook/:id",
            get(get_note).post(update_note).delete(delete_note),
        )
        .route(
            "/api/v1/notebook/:id/",
            get(get_note).post(update_note).delete(delete_note),
        )
        .route("/api/v1/images", post(upload_image))
        .route("/api/v1/images/", post(upload_image))
        .route(
            "/api/v1/images/:key",
            get(download_image).delete(delete_image),
        )
        .route("/api/v1/images/:key/", get(download_image))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Raw pagination parameters. Kept as strings so that garbage values fall
/// back to defaults instead of rejecting the request.
#[derive(Deserialize)]
struct ListQuery {
    offset: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
struct ImageUploadResponse {
    image_id: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Notes ───

async fn list_notes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Note>>, ServerError> {
    let page = Page::parse(query.offset.as_deref(), query.limit.as_deref());
    let notes = state
        .notes()?
        .list_notes(page)
        .map_err(|e| ServerError::from_store(e, ""))?;
    Ok(Json(notes))
}

async fn create_note(
    headers: HeaderMap,
    State(state): State<AppState>,
    payload: Result<Json<Note>, JsonRejection>,
) -> Result<(StatusCode, Json<Note>), ServerError> {
    let note = json_body(&headers, payload)?;
    let created = state
        .notes()?
        .create_note(&note)
        .map_err(|e| ServerError::from_store(e, &note.id))?;

    info!(id = %created.id, "Note created via API");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Note>, ServerError> {
    let note = state
        .notes()?
        .get_note(&id)
        .map_err(|e| ServerError::from_store(e, &id))?;
    Ok(Json(note))
}

async fn update_note(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<NotePatch>, JsonRejection>,
) -> Result<Json<Note>, ServerError> {
    let patch = json_body(&headers, payload)?;
    let updated = state
        .notes()?
        .update_note(&id, &patch)
        .map_err(|e| ServerError::from_store(e, &id))?;
    Ok(Json(updated))
}

async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state
        .notes()?
        .delete_note(&id)
        .map_err(|e| ServerError::from_store(e, &id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Images ───

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageUploadResponse>), ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("image") {
            let chunks = field.map(|chunk| chunk.map_err(io::Error::other));
            let image_id = state.images.put(chunks).await?;

            info!(image_id = %image_id, "Image uploaded via API");

            return Ok((StatusCode::CREATED, Json(ImageUploadResponse { image_id })));
        }
    }

    Err(ServerError::BadRequest(
        "Missing 'image' field in multipart form".to_string(),
    ))
}

async fn download_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ServerError> {
    let file = state.images.open(&key).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

async fn delete_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.images.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
