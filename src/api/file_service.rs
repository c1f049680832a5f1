//! File routes.
//!
//! - GET    /files/                              list files with their latest version
//! - GET    /files/versions/{name}               list every version of one file
//! - GET    /files/download/{name}?version=N     download latest or a given version
//! - POST   /files/upload                        multipart upload (part `file`)
//! - POST   /files/upload/{name}                 raw-body upload
//! - POST   /files/update?version=N              multipart overwrite of one version
//! - POST   /files/update/{name}?version=N       raw-body overwrite of one version
//! - DELETE /files/?fileName=X[&version=N]       delete a file or one version

use std::io::{self, Read};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::storage::{Blob, BlobAddress, VersionNumber};
use crate::store::{SaveOutcome, VersionedFileStore};

const STREAM_CHUNK_BYTES: usize = 64 * 1024;
const STREAM_BUFFER_CHUNKS: usize = 4;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VersionedFileStore>,
    /// Base used to build download links, e.g. `http://localhost:8080`.
    pub public_url: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<VersionedFileStore>, public_url: &str) -> Self {
        Self {
            store,
            public_url: Arc::from(public_url.trim_end_matches('/')),
        }
    }
}

/// Builds the download link for `(name, version)` under `public_url`.
pub fn download_link(public_url: &str, name: &str, version: VersionNumber) -> String {
    format!(
        "{}/files/download/{}?version={}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(name),
        version
    )
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub name: String,
    pub latest_version: VersionNumber,
    pub last_modification_date: DateTime<Utc>,
    pub download_link: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    pub version: VersionNumber,
    pub last_modification_date: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub name: String,
    pub version: VersionNumber,
    #[serde(rename = "downloadURI")]
    pub download_uri: String,
    pub content_type: Option<String>,
    pub size: u64,
}

impl FileResponse {
    fn from_outcome(state: &AppState, outcome: SaveOutcome) -> Self {
        Self {
            download_uri: download_link(&state.public_url, &outcome.name, outcome.version),
            name: outcome.name,
            version: outcome.version,
            content_type: outcome.content_type,
            size: outcome.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<VersionNumber>,
}

#[derive(Debug, Deserialize)]
pub struct RequiredVersionQuery {
    pub version: VersionNumber,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub version: Option<VersionNumber>,
}

/// Build the file router with the given upload size limit.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/files", get(list_files).delete(delete_file))
        .route("/files/", get(list_files).delete(delete_file))
        .route("/files/versions/{name}", get(list_versions))
        .route("/files/download/{name}", get(download_file))
        .route("/files/upload", post(upload_multipart))
        .route("/files/upload/{name}", post(upload_binary))
        .route("/files/update", post(update_multipart))
        .route("/files/update/{name}", post(update_binary))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileListing>>, ApiError> {
    let store = state.store.clone();
    let summaries = tokio::task::spawn_blocking(move || store.list()).await??;

    let listings = summaries
        .into_iter()
        .map(|s| FileListing {
            download_link: download_link(&state.public_url, &s.name, s.latest_version),
            name: s.name,
            latest_version: s.latest_version,
            last_modification_date: s.last_modified,
        })
        .collect();
    Ok(Json(listings))
}

async fn list_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<VersionListing>>, ApiError> {
    let store = state.store.clone();
    let versions = tokio::task::spawn_blocking(move || store.list_versions(&name)).await??;
    Ok(Json(
        versions
            .into_iter()
            .map(|v| VersionListing {
                version: v.version,
                last_modification_date: v.last_modified,
            })
            .collect(),
    ))
}

async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let fetched = tokio::task::spawn_blocking(move || store.fetch(&name, query.version)).await??;

    debug!(name = %fetched.name, version = fetched.version, size = fetched.blob.len, "Serving download");

    let file_name = fetched
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&fetched.name)
        .replace('"', "");
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(guess_content_type(&fetched.name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(fetched.blob.len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
            .map_err(|_| ApiError::BadRequest("file name is not a valid header value".to_string()))?,
    );
    Ok((StatusCode::OK, headers, stream_blob(fetched.address, fetched.blob)).into_response())
}

/// Pumps a blob's blocking reader into a response body chunk by chunk.
fn stream_blob(address: BlobAddress, blob: Blob) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(STREAM_BUFFER_CHUNKS);
    tokio::task::spawn_blocking(move || {
        let mut reader = blob.into_reader();
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // Receiver gone means the client hung up.
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(address = %address, error = %e, "Blob read failed mid-download");
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

async fn upload_binary(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let content_type = header_content_type(&headers);
    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut reader: &[u8] = &body;
        store.save(&name, &mut reader, content_type.as_deref())
    })
    .await??;
    Ok((StatusCode::CREATED, Json(FileResponse::from_outcome(&state, outcome))))
}

async fn upload_multipart(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let part = read_file_part(multipart).await?;
    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut reader: &[u8] = &part.data;
        store.save(&part.file_name, &mut reader, part.content_type.as_deref())
    })
    .await??;
    Ok((StatusCode::CREATED, Json(FileResponse::from_outcome(&state, outcome))))
}

async fn update_binary(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RequiredVersionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FileResponse>, ApiError> {
    let content_type = header_content_type(&headers);
    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut reader: &[u8] = &body;
        store.update_version(&name, &mut reader, query.version, content_type.as_deref())
    })
    .await??;
    Ok(Json(FileResponse::from_outcome(&state, outcome)))
}

async fn update_multipart(
    State(state): State<AppState>,
    Query(query): Query<RequiredVersionQuery>,
    multipart: Multipart,
) -> Result<Json<FileResponse>, ApiError> {
    let part = read_file_part(multipart).await?;
    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut reader: &[u8] = &part.data;
        store.update_version(&part.file_name, &mut reader, query.version, part.content_type.as_deref())
    })
    .await??;
    Ok(Json(FileResponse::from_outcome(&state, outcome)))
}

async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || match query.version {
        Some(version) => store.delete_version(&query.file_name, version),
        None => store.delete(&query.file_name),
    })
    .await??;
    Ok(StatusCode::OK)
}

struct FilePart {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

/// Pulls the `file` part out of a multipart body. A part without a file name yields an
/// empty name, which the store rejects as invalid.
async fn read_file_part(mut multipart: Multipart) -> Result<FilePart, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok(FilePart {
            file_name,
            content_type,
            data,
        });
    }
    Err(ApiError::BadRequest("multipart body has no `file` part".to_string()))
}

fn header_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Content type for a download, from the name's extension.
fn guess_content_type(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
