use std::io::{Seek, SeekFrom};
use std::str::FromStr;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, NaiveDate, Utc};
use dedup_types::{Digest, ObjectFilter, StorageStats, StoredObject, UploadOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const STREAM_CHUNK: usize = 64 * 1024;

/// JSON shape of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectView {
    pub id: String,
    pub digest: String,
    pub original_filename: String,
    pub file_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// URL of the raw content.
    pub file: String,
}

impl From<&StoredObject> for ObjectView {
    fn from(object: &StoredObject) -> Self {
        let hex = object.digest.to_hex();
        Self {
            file: format!("/api/files/{hex}/content"),
            id: hex.clone(),
            digest: hex,
            original_filename: object.original_name.clone(),
            file_type: object.content_type.clone(),
            size: object.size,
            uploaded_at: object.stored_at,
        }
    }
}

/// JSON shape of an upload response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadView {
    #[serde(flatten)]
    pub object: ObjectView,
    pub deduplicated: bool,
    pub storage_savings: u64,
}

impl From<&UploadOutcome> for UploadView {
    fn from(outcome: &UploadOutcome) -> Self {
        Self {
            object: ObjectView::from(&outcome.object),
            deduplicated: outcome.is_duplicate,
            storage_savings: outcome.bytes_saved,
        }
    }
}

/// JSON shape of `GET /api/storage-stats/`: the three ledger totals only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsView {
    pub total_physical: u64,
    pub total_logical: u64,
    pub total_savings: u64,
}

impl From<&StorageStats> for StatsView {
    fn from(stats: &StorageStats) -> Self {
        Self {
            total_physical: stats.total_physical,
            total_logical: stats.total_logical,
            total_savings: stats.total_savings,
        }
    }
}

/// Query string of `GET /api/files/`. Empty values are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub file_type: Option<String>,
    pub size_min: Option<String>,
    pub size_max: Option<String>,
    pub uploaded_after: Option<String>,
    pub uploaded_before: Option<String>,
}

impl ListQuery {
    pub fn into_filter(self) -> ServerResult<ObjectFilter> {
        let mut filter = ObjectFilter::new().size_range(
            parse_size("size_min", self.size_min.as_deref())?,
            parse_size("size_max", self.size_max.as_deref())?,
        );
        if let Some(search) = non_empty(self.search.as_deref()) {
            filter = filter.name_contains(search);
        }
        if let Some(file_type) = non_empty(self.file_type.as_deref()) {
            filter = filter.content_type(file_type);
        }
        let after = parse_day("uploaded_after", self.uploaded_after.as_deref())?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc());
        let before = parse_day("uploaded_before", self.uploaded_before.as_deref())?
            .and_then(|d| d.and_hms_nano_opt(23, 59, 59, 999_999_999))
            .map(|t| t.and_utc());
        Ok(filter.stored_between(after, before))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_size(name: &str, value: Option<&str>) -> ServerResult<Option<u64>> {
    non_empty(value)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| ServerError::BadRequest(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}

fn parse_day(name: &str, value: Option<&str>) -> ServerResult<Option<NaiveDate>> {
    non_empty(value)
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|_| ServerError::BadRequest(format!("{name} must be a YYYY-MM-DD date")))
        })
        .transpose()
}

fn parse_digest(raw: &str) -> ServerResult<Digest> {
    Digest::from_str(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn multipart_error(err: MultipartError, limit: u64) -> ServerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge { limit }
    } else {
        ServerError::BadRequest(err.body_text())
    }
}

async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
}

/// Health check handler.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Info handler.
pub async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "dedup-server",
        "version": env!("CARGO_PKG_VERSION"),
        "digest": "blake3",
    }))
}

/// A spooled upload: content hashed while it was written to a temp file.
struct Spooled {
    file: std::fs::File,
    digest: Digest,
    size: u64,
    name: String,
    content_type: String,
}

/// Stream one multipart field into an anonymous temp file, hashing as it goes.
async fn spool_field(
    state: &AppState,
    mut field: Field<'_>,
) -> ServerResult<Spooled> {
    let name = field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or(UPLOAD_FIELD)
        .to_string();
    let content_type = field
        .content_type()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string();

    let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
    let mut context = state.addresser.begin();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_size))?
    {
        state.addresser.update(&mut context, &chunk);
        if context.consumed() > state.max_upload_size {
            return Err(ServerError::PayloadTooLarge {
                limit: state.max_upload_size,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let addressed = state.addresser.finish(context);
    Ok(Spooled {
        file: file.into_std().await,
        digest: addressed.digest,
        size: addressed.size,
        name,
        content_type,
    })
}

/// `POST /api/files/`: 201 for new content, 200 for a duplicate.
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ServerResult<(StatusCode, Json<UploadView>)> {
    let mut spooled = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_size))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            spooled = Some(spool_field(&state, field).await?);
            break;
        }
    }
    let spooled =
        spooled.ok_or_else(|| ServerError::BadRequest("no file was submitted".into()))?;
    if spooled.size == 0 {
        return Err(ServerError::BadRequest("the submitted file is empty".into()));
    }
    debug!(digest = %spooled.digest.short_hex(), size = spooled.size, "upload spooled");

    let store = state.store.clone();
    let outcome = run_blocking(move || {
        let Spooled {
            mut file,
            digest,
            size,
            name,
            content_type,
        } = spooled;
        file.seek(SeekFrom::Start(0))?;
        Ok(store.submit(digest, size, &name, &content_type, file)?)
    })
    .await?;

    let status = if outcome.is_duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(UploadView::from(&outcome))))
}

/// `GET /api/files/`
pub async fn list_handler(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ServerResult<Json<Vec<ObjectView>>> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let filter = query.into_filter()?;
    let store = state.store.clone();
    let objects = run_blocking(move || Ok(store.list(&filter)?)).await?;
    Ok(Json(objects.iter().map(ObjectView::from).collect()))
}

/// `GET /api/files/{digest}/`
pub async fn get_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ServerResult<Json<ObjectView>> {
    let digest = parse_digest(&raw)?;
    let store = state.store.clone();
    let object = run_blocking(move || Ok(store.get(&digest)?))
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("no object with digest {digest}")))?;
    Ok(Json(ObjectView::from(&object)))
}

/// `GET /api/files/{digest}/content`
///
/// The body streams from the store in chunks; nothing is buffered whole.
pub async fn content_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ServerResult<Response> {
    let digest = parse_digest(&raw)?;
    let store = state.store.clone();
    let (object, mut reader) = run_blocking(move || Ok(store.open_content(&digest)?)).await?;

    let (sink, source) = tokio::io::duplex(STREAM_CHUNK);
    let mut sink = SyncIoBridge::new(sink);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = std::io::copy(&mut reader, &mut sink) {
            warn!(digest = %digest.short_hex(), error = %e, "content stream aborted");
        }
    });

    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        header_safe(&object.original_name)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(object.size)),
        ],
        Body::from_stream(ReaderStream::new(source)),
    )
        .into_response())
}

/// `GET /api/storage-stats/`
pub async fn stats_handler(State(state): State<AppState>) -> ServerResult<Json<StatsView>> {
    let store = state.store.clone();
    let stats = run_blocking(move || Ok(store.compute_stats()?)).await?;
    Ok(Json(StatsView::from(&stats)))
}

fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
