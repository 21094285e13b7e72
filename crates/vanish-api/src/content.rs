use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{error, info, warn};

use vanish_core::{
    ContentSnapshot, ExpiryRequest, InvalidInput, NewContent, ShareError, StagedFile,
};
use vanish_types::api::{ApiResponse, ContentResponse, DownloadQuery, PeekRequest, UploadResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::bearer_claims;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Raw multipart fields of an upload, before validation.
#[derive(Default)]
struct UploadForm {
    text: Option<String>,
    file: Option<StagedFile>,
    expiry_minutes: Option<String>,
    expiry_date: Option<String>,
    expiry_time: Option<String>,
    password: Option<String>,
    one_time_view: Option<String>,
    max_views: Option<String>,
}

/// POST /api/upload: multipart `text` or `file`, plus lifetime and access options.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let owner = bearer_claims(&headers, &state.jwt_secret).map(|c| c.sub.to_string());

    let mut form = read_form(&state, multipart).await?;
    let staged = form.file.take();
    let input = match build_request(form, owner) {
        Ok(input) => NewContent { file: staged, ..input },
        Err(e) => {
            if let Some(file) = staged {
                discard(&state, &file.blob_path).await;
            }
            return Err(ShareError::from(e).into());
        }
    };

    let created = state.service.create(input, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "Content uploaded successfully",
            UploadResponse {
                unique_id: created.id,
                share_link: created.share_link,
                expires_at: created.expires_at,
                kind: created.kind,
            },
        )),
    ))
}

/// Drain the multipart body. File parts are streamed straight into blob
/// storage; if anything fails afterwards the blob is removed again.
async fn read_form(state: &AppState, mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    let result: Result<(), ApiError> = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e.body_text())))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                if form.file.is_some() {
                    return Err(ShareError::from(InvalidInput::BothOrNeitherProvided).into());
                }
                form.file = stage_file(state, field).await?;
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e.body_text())))?;
            match name.as_str() {
                "text" => form.text = Some(value),
                "expiryMinutes" => form.expiry_minutes = Some(value),
                "expiryDate" => form.expiry_date = Some(value),
                "expiryTime" => form.expiry_time = Some(value),
                "password" => form.password = Some(value),
                "oneTimeView" => form.one_time_view = Some(value),
                "maxViews" => form.max_views = Some(value),
                other => warn!("Ignoring unknown upload field {:?}", other),
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        if let Some(file) = form.file.take() {
            discard(state, &file.blob_path).await;
        }
        return Err(e);
    }
    Ok(form)
}

/// Stream one file part to disk. An empty part with no name (an untouched
/// file input) counts as no file.
async fn stage_file(state: &AppState, field: Field<'_>) -> Result<Option<StagedFile>, ApiError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let (blob_path, file_size) = state
        .service
        .storage()
        .put_stream(Box::pin(field))
        .await
        .map_err(|e| {
            warn!("Upload stream failed: {}", e);
            ApiError::BadRequest("Upload was interrupted or too large".to_string())
        })?;

    if file_size == 0 && file_name.is_empty() {
        discard(state, &blob_path).await;
        return Ok(None);
    }

    Ok(Some(StagedFile {
        blob_path,
        file_name: if file_name.is_empty() { "upload".to_string() } else { file_name },
        file_size,
        mime_type,
    }))
}

/// Validate the text fields of an upload.
fn build_request(form: UploadForm, owner: Option<String>) -> Result<NewContent, InvalidInput> {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let expiry = ExpiryRequest {
        minutes: non_empty(form.expiry_minutes).and_then(|m| m.parse::<i64>().ok()),
        date: non_empty(form.expiry_date)
            .map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|_| InvalidInput::InvalidExpiry(format!("bad date {:?}", d)))
            })
            .transpose()?,
        time: non_empty(form.expiry_time)
            .map(|t| {
                NaiveTime::parse_from_str(&t, "%H:%M")
                    .map_err(|_| InvalidInput::InvalidExpiry(format!("bad time {:?}", t)))
            })
            .transpose()?,
    };

    let max_views = non_empty(form.max_views)
        .map(|v| match v.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(InvalidInput::InvalidMaxViews),
        })
        .transpose()?;

    let one_time_view = non_empty(form.one_time_view)
        .is_some_and(|v| matches!(v.as_str(), "true" | "on" | "1"));

    Ok(NewContent {
        text: form.text,
        file: None,
        expiry,
        password: form.password.filter(|p| !p.is_empty()),
        one_time_view,
        max_views,
        owner,
    })
}

/// POST /api/content/{id}: show text, or file metadata. Body `{ "password"?: string }`.
pub async fn peek(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: PeekRequest = if body.iter().all(u8::is_ascii_whitespace) {
        PeekRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };

    let snapshot = state
        .service
        .peek(&id, req.password.as_deref(), Utc::now())
        .await?;

    Ok(Json(ApiResponse::ok(content_response(snapshot))))
}

/// GET /api/download/{id}?password=: stream a file body as an attachment.
///
/// The view is settled only after the last byte has been handed to the
/// connection; a client that disconnects early gets its view back.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let mut delivery = state
        .service
        .fetch_body(&id, query.password.as_deref(), Utc::now())
        .await?;

    let snapshot = delivery.snapshot().clone();
    let meta = snapshot.file.clone().ok_or(ShareError::NotFound)?;

    let stream = async_stream::stream! {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match delivery.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    error!("Read failed while delivering {}: {}", snapshot.id, e);
                    yield Err(e);
                    return;
                }
            }
        }
        if let Err(e) = delivery.complete().await {
            error!("Failed to settle delivery of {}: {}", snapshot.id, e);
        }
    };

    let content_type = HeaderValue::from_str(&meta.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&content_disposition(&meta.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.file_size));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    info!("Streaming {} ({} bytes)", id, meta.file_size);
    Ok(response)
}

/// DELETE /api/content/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let requester = bearer_claims(&headers, &state.jwt_secret).map(|c| c.sub.to_string());
    state.service.delete(&id, requester.as_deref()).await?;

    Ok(Json(ApiResponse::with_message("Content deleted successfully", ())))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn content_response(snapshot: ContentSnapshot) -> ContentResponse {
    let file = snapshot.file;
    ContentResponse {
        kind: snapshot.kind,
        text_content: snapshot.text,
        file_name: file.as_ref().map(|f| f.file_name.clone()),
        file_type: file.as_ref().map(|f| f.mime_type.clone()),
        file_size: file.as_ref().map(|f| f.file_size),
        expires_at: snapshot.expires_at,
        view_count: snapshot.view_count,
        max_views: snapshot.max_views,
        one_time_view: snapshot.one_time_view,
    }
}

/// `attachment` header with an ASCII fallback name and an RFC 5987 UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

async fn discard(state: &AppState, blob: &str) {
    if let Err(e) = state.service.storage().delete(blob).await {
        warn!("Failed to discard staged blob {}: {}", blob, e);
    }
}
