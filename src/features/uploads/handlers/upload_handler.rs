use axum::{
    body::Bytes,
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::core::error::AppError;
use crate::core::extractor::AppJson;
use crate::features::auth::model::AuthenticatedUser;
use crate::features::catalog::dtos::CatalogEntryDto;
use crate::features::quota::dtos::QuotaExceededDto;
use crate::features::uploads::dtos::{
    AbortUploadResponseDto, ChunkAckDto, CompleteUploadDto, SweepResultDto, UploadChunkDto,
    UploadSessionStatusDto,
};
use crate::features::uploads::services::{Assembler, ChunkReceiver, ChunkUpload, SessionStore};
use crate::features::uploads::workers::SessionSweeper;
use crate::shared::constants::ROLE_ADMIN;
use crate::shared::types::ApiResponse;

/// Shared state for upload handlers
#[derive(Clone)]
pub struct UploadState {
    pub receiver: Arc<ChunkReceiver>,
    pub assembler: Arc<Assembler>,
    pub sessions: Arc<SessionStore>,
    pub sweeper: Arc<SessionSweeper>,
}

/// Metadata fields collected from the multipart form
#[derive(Default)]
struct ChunkFields {
    upload_id: Option<String>,
    chunk_index: Option<u32>,
    total_chunks: Option<u32>,
    file_name: Option<String>,
    parent_id: Option<Uuid>,
}

impl ChunkFields {
    /// All required metadata, if already seen
    fn ready(&self) -> Option<ChunkUpload> {
        Some(ChunkUpload {
            upload_id: self.upload_id.clone()?,
            chunk_index: self.chunk_index?,
            total_chunks: self.total_chunks?,
            file_name: self.file_name.clone()?,
            parent_id: self.parent_id,
        })
    }

    fn require(self) -> Result<ChunkUpload, AppError> {
        let missing = |name: &str| AppError::BadRequest(format!("{} is required", name));
        Ok(ChunkUpload {
            upload_id: self.upload_id.ok_or_else(|| missing("upload_id"))?,
            chunk_index: self.chunk_index.ok_or_else(|| missing("chunk_index"))?,
            total_chunks: self.total_chunks.ok_or_else(|| missing("total_chunks"))?,
            file_name: self.file_name.ok_or_else(|| missing("file_name"))?,
            parent_id: self.parent_id,
        })
    }
}

async fn read_text(field: Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read {} field: {}", name, e)))
}

async fn read_number(field: Field<'_>, name: &str) -> Result<u32, AppError> {
    read_text(field, name)
        .await?
        .trim()
        .parse::<u32>()
        .map_err(|_| AppError::BadRequest(format!("{} must be a non-negative integer", name)))
}

/// Upload one chunk of a file
///
/// Accepts multipart/form-data with `upload_id`, `chunk_index`,
/// `total_chunks`, `file_name`, optional `parent_id`, and the `chunk` bytes.
/// A success response means the chunk is durably stored. Re-sending a stored
/// ordinal is acknowledged without overwriting it.
#[utoipa::path(
    post,
    path = "/api/uploads/chunk",
    tag = "uploads",
    request_body(
        content = UploadChunkDto,
        content_type = "multipart/form-data",
        description = "Chunk payload with its session metadata",
    ),
    responses(
        (status = 200, description = "Chunk stored", body = ApiResponse<ChunkAckDto>),
        (status = 400, description = "Missing or invalid fields"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Session belongs to another user"),
        (status = 413, description = "Chunk too large"),
        (status = 500, description = "Storage failure, prior chunks are kept")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn upload_chunk(
    user: AuthenticatedUser,
    State(state): State<UploadState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ChunkAckDto>>, AppError> {
    let mut fields = ChunkFields::default();
    let mut buffered: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        debug!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read multipart data: {}", e))
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "chunk" => {
                // Metadata already known: stream straight to disk
                if let Some(upload) = fields.ready() {
                    let ack = state
                        .receiver
                        .store(user.owner_id(), &upload, field)
                        .await?;
                    return Ok(Json(ApiResponse::success(Some(ack), None, None)));
                }

                let data = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read chunk data: {}", e))
                })?;
                if data.len() > state.receiver.max_chunk_bytes() {
                    return Err(AppError::PayloadTooLarge(format!(
                        "Chunk exceeds maximum size of {} bytes",
                        state.receiver.max_chunk_bytes()
                    )));
                }
                buffered = Some(data);
            }
            "upload_id" => fields.upload_id = Some(read_text(field, "upload_id").await?),
            "chunk_index" => fields.chunk_index = Some(read_number(field, "chunk_index").await?),
            "total_chunks" => fields.total_chunks = Some(read_number(field, "total_chunks").await?),
            "file_name" => fields.file_name = Some(read_text(field, "file_name").await?),
            "parent_id" => {
                let text = read_text(field, "parent_id").await?;
                let text = text.trim();
                if !text.is_empty() {
                    let id = Uuid::parse_str(text).map_err(|_| {
                        AppError::BadRequest("parent_id must be a UUID".to_string())
                    })?;
                    fields.parent_id = Some(id);
                }
            }
            _ => {
                debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let upload = fields.require()?;
    let data = buffered.ok_or_else(|| AppError::BadRequest("chunk is required".to_string()))?;
    let payload = futures::stream::once(async move { Ok::<_, Infallible>(data) });

    let ack = state
        .receiver
        .store(user.owner_id(), &upload, payload)
        .await?;

    Ok(Json(ApiResponse::success(Some(ack), None, None)))
}

/// Signal that every chunk has been sent
///
/// Re-checks the quota against committed usage, assembles the chunks in
/// order and registers the artifact. A 507 response carries the quota
/// figures and means the session was purged.
#[utoipa::path(
    post,
    path = "/api/uploads/complete",
    tag = "uploads",
    request_body = CompleteUploadDto,
    responses(
        (status = 201, description = "File assembled", body = ApiResponse<CatalogEntryDto>),
        (status = 400, description = "Invalid request or size mismatch"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session or parent folder not found"),
        (status = 409, description = "Chunks missing or assembly already running"),
        (status = 507, description = "Storage quota exceeded", body = ApiResponse<QuotaExceededDto>)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn complete_upload(
    user: AuthenticatedUser,
    State(state): State<UploadState>,
    AppJson(dto): AppJson<CompleteUploadDto>,
) -> Result<(StatusCode, Json<ApiResponse<CatalogEntryDto>>), AppError> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let entry = state
        .assembler
        .complete(user.owner_id(), dto.into())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            Some(entry),
            Some("Upload completed".to_string()),
            None,
        )),
    ))
}

/// Report which chunks the server holds for a session
#[utoipa::path(
    get,
    path = "/api/uploads/{upload_id}",
    tag = "uploads",
    params(
        ("upload_id" = String, Path, description = "Upload session id")
    ),
    responses(
        (status = 200, description = "Session status", body = ApiResponse<UploadSessionStatusDto>),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_upload_status(
    user: AuthenticatedUser,
    State(state): State<UploadState>,
    Path(upload_id): Path<String>,
) -> Result<Json<ApiResponse<UploadSessionStatusDto>>, AppError> {
    if !crate::shared::validation::is_valid_upload_id(&upload_id) {
        return Err(AppError::BadRequest("upload_id is invalid".to_string()));
    }

    let meta = state
        .sessions
        .load_owned(&upload_id, user.owner_id())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Upload session {} not found", upload_id)))?;
    let received = state.sessions.received_chunks(&upload_id).await?;

    Ok(Json(ApiResponse::success(
        Some(UploadSessionStatusDto::new(meta, received)),
        None,
        None,
    )))
}

/// Abort a session and purge its stored chunks
///
/// Idempotent: aborting an unknown session reports `purged: false`.
#[utoipa::path(
    delete,
    path = "/api/uploads/{upload_id}",
    tag = "uploads",
    params(
        ("upload_id" = String, Path, description = "Upload session id")
    ),
    responses(
        (status = 200, description = "Session aborted", body = ApiResponse<AbortUploadResponseDto>),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Session belongs to another user")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn abort_upload(
    user: AuthenticatedUser,
    State(state): State<UploadState>,
    Path(upload_id): Path<String>,
) -> Result<Json<ApiResponse<AbortUploadResponseDto>>, AppError> {
    if !crate::shared::validation::is_valid_upload_id(&upload_id) {
        return Err(AppError::BadRequest("upload_id is invalid".to_string()));
    }

    let owner_id = user.owner_id();
    let purged = match state.sessions.load_owned(&upload_id, owner_id).await? {
        Some(_) => state.sessions.purge(&upload_id).await?,
        None => false,
    };

    Ok(Json(ApiResponse::success(
        Some(AbortUploadResponseDto { upload_id, purged }),
        None,
        None,
    )))
}

/// Purge stale sessions now instead of waiting for the next sweep
#[utoipa::path(
    post,
    path = "/api/admin/uploads/sweep",
    tag = "admin",
    responses(
        (status = 200, description = "Sweep finished", body = ApiResponse<SweepResultDto>),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Admin role required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn sweep_sessions(
    user: AuthenticatedUser,
    State(state): State<UploadState>,
) -> Result<Json<ApiResponse<SweepResultDto>>, AppError> {
    if !user.has_role(ROLE_ADMIN) {
        return Err(AppError::Forbidden("Admin role required".to_string()));
    }

    let result = state.sweeper.sweep_once().await?;

    Ok(Json(ApiResponse::success(Some(result), None, None)))
}
