/* src/server/handlers.rs */

use super::AppState;
use super::listing::collect_entries;
use super::response::bad_multipart;
use crate::ingest::chunks::ChunkStatus;
use crate::ingest::coordinator::{ChunkUpload, IncomingFile, Limits};
use crate::ingest::naming::sanitize;
use crate::ingest::stats::{format_file_size, format_speed};
use crate::ingest::{IngestError, IngestResult, Rejection};
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use log::{debug, info};
use serde_json::{Value, json};
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::fs as tokio_fs;
use tokio_util::io::{ReaderStream, StreamReader};

type ApiResult = Result<Json<Value>, IngestError>;

fn client_of(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

fn seconds(start: Instant) -> String {
    format!("{:.3}s", start.elapsed().as_secs_f64())
}

/// Reads one multipart field into memory, refusing to buffer more than `cap` bytes.
/// An oversized field is drained so the rest of the body can still be parsed.
async fn read_capped(field: &mut Field<'_>, cap: u64) -> IngestResult<Result<Vec<u8>, Rejection>> {
    let mut data = Vec::new();
    let mut seen: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        seen += chunk.len() as u64;
        if seen > cap {
            data = Vec::new();
            continue;
        }
        data.extend_from_slice(&chunk);
    }
    if seen > cap {
        return Ok(Err(Rejection::TooLarge { size: seen, max: cap }));
    }
    Ok(Ok(data))
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult {
    let start = Instant::now();
    let files = collect_entries(state.coordinator.stats(), state.metadata_timeout).await?;
    debug!("   - Listed {} file(s) in {}.", files.len(), seconds(start));
    Ok(Json(json!({
        "count": files.len(),
        "files": files,
        "processing_time": seconds(start),
    })))
}

pub async fn upload_single(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ApiResult {
    let client = client_of(&addr);
    let start = Instant::now();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let declared = field.file_name().unwrap_or_default().to_string();
        if declared.is_empty() {
            return Err(IngestError::BadRequest("No file selected".to_string()));
        }
        let mime = field.content_type().map(str::to_string);
        let reader = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(reader);

        let stored = state
            .coordinator
            .upload_whole(&client, &declared, mime.as_deref(), None, reader)
            .await?;
        let elapsed = start.elapsed();
        return Ok(Json(json!({
            "message": "File uploaded successfully",
            "filename": stored.final_name,
            "original_name": declared,
            "size": stored.size,
            "size_formatted": format_file_size(stored.size),
            "upload_time": seconds(start),
            "speed": format_speed(stored.size, elapsed),
        })));
    }

    Err(IngestError::BadRequest("No file part in the request".to_string()))
}

pub async fn upload_multiple(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ApiResult {
    let client = client_of(&addr);
    state.coordinator.admit(&client).await?;
    let start = Instant::now();
    let cap = state.coordinator.limits().await.max_file_size;

    let mut incoming = Vec::new();
    let mut early_errors = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("files") {
            continue;
        }
        let declared = field.file_name().unwrap_or_default().to_string();
        let mime_hint = field.content_type().map(str::to_string);
        match read_capped(&mut field, cap).await? {
            Ok(_) if declared.is_empty() => {
                early_errors.push(format!("(unnamed): {}", Rejection::InvalidFilename(declared)));
            }
            Ok(data) => incoming.push(IncomingFile {
                declared_name: declared,
                mime_hint,
                data,
            }),
            Err(rejection) => early_errors.push(format!("{}: {}", declared, rejection)),
        }
    }

    if incoming.is_empty() && early_errors.is_empty() {
        return Err(IngestError::BadRequest("No files were sent".to_string()));
    }

    let mut summary = state.coordinator.store_batch(incoming).await;
    summary.errors.splice(0..0, early_errors);
    info!(
        "> Batch from {}: {} stored, {} failed in {}.",
        client,
        summary.stored.len(),
        summary.errors.len(),
        seconds(start)
    );

    let total = summary.total_bytes();
    let files: Vec<&str> = summary.stored.iter().map(|f| f.final_name.as_str()).collect();
    let sizes: Vec<u64> = summary.stored.iter().map(|f| f.size).collect();
    let mut body = json!({
        "message": format!("{} files uploaded successfully", files.len()),
        "files": files,
        "sizes": sizes,
        "total_size": format_file_size(total),
        "total_bytes": total,
        "upload_time": seconds(start),
        "avg_speed": format_speed(total, start.elapsed()),
    });
    if summary.is_partial() {
        body["errors"] = json!(summary.errors);
    }
    Ok(Json(body))
}

pub async fn upload_chunk(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ApiResult {
    let client = client_of(&addr);
    state.coordinator.admit(&client).await?;
    let cap = state.coordinator.limits().await.max_file_size;

    let mut bytes = None;
    let mut filename = None;
    let mut index = None;
    let mut total_chunks = None;
    let mut total_size = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "chunk" => bytes = Some(read_capped(&mut field, cap).await?.map_err(IngestError::from)?),
            "filename" => filename = Some(field.text().await.map_err(bad_multipart)?),
            "chunkIndex" => index = Some(parse_number::<u32>(field, "chunkIndex").await?),
            "totalChunks" => total_chunks = Some(parse_number::<u32>(field, "totalChunks").await?),
            "totalSize" => total_size = Some(parse_number::<u64>(field, "totalSize").await?),
            _ => {}
        }
    }

    let (Some(bytes), Some(filename), Some(index), Some(total_chunks)) =
        (bytes, filename, index, total_chunks)
    else {
        return Err(IngestError::BadRequest(
            "chunk, filename, chunkIndex and totalChunks are required".to_string(),
        ));
    };

    let status = state
        .coordinator
        .store_chunk(ChunkUpload {
            declared_name: &filename,
            index,
            total_chunks,
            total_size,
            bytes: &bytes,
        })
        .await?;

    Ok(Json(match status {
        ChunkStatus::Accepted { index, total } => json!({
            "message": format!("Chunk {}/{} received", index + 1, total),
        }),
        ChunkStatus::Complete(assembled) => {
            let mut body = json!({
                "message": "File assembled successfully",
                "filename": assembled.stored.final_name,
                "original_name": assembled.logical_name,
                "size": assembled.stored.size,
                "size_formatted": format_file_size(assembled.stored.size),
            });
            if !assembled.missing.is_empty() {
                body["missing_chunks"] = json!(assembled.missing);
            }
            body
        }
    }))
}

async fn parse_number<T: std::str::FromStr>(field: Field<'_>, label: &str) -> IngestResult<T> {
    let text = field.text().await.map_err(bad_multipart)?;
    text.trim()
        .parse::<T>()
        .map_err(|_| IngestError::BadRequest(format!("{} must be a non-negative integer, got '{}'", label, text)))
}

pub async fn download(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, IngestError> {
    let not_found = || IngestError::NotFound(format!("File '{}' not found", name));
    if sanitize(&name).as_deref() != Some(name.as_str()) {
        return Err(not_found());
    }

    let path = state.coordinator.upload_dir().join(&name);
    let meta = match tokio_fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Err(not_found()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };
    let file = tokio_fs::File::open(&path).await?;

    let mut headers = HeaderMap::new();
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));

    debug!("   - Serving '{}' ({} bytes).", name, meta.len());
    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

pub async fn stats(State(state): State<AppState>) -> ApiResult {
    let cache = state.coordinator.stats();
    let summary = cache.get().await?;
    let folder = tokio_fs::canonicalize(cache.upload_dir())
        .await
        .unwrap_or_else(|_| cache.upload_dir().to_path_buf());
    Ok(Json(json!({
        "total_photos": summary.file_count,
        "total_size": format_file_size(summary.total_bytes),
        "total_bytes": summary.total_bytes,
        "cache_entries": cache.cache_entries().await,
        "upload_folder": folder.display().to_string(),
    })))
}

pub async fn get_limits(State(state): State<AppState>) -> Json<Limits> {
    Json(state.coordinator.limits().await)
}

pub async fn set_limits(State(state): State<AppState>, Json(limits): Json<Limits>) -> Result<Json<Limits>, IngestError> {
    Ok(Json(state.coordinator.set_max_file_size(limits.max_file_size).await?))
}
