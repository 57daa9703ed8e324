use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::features::uploads::services::{CompleteUpload, SessionMeta};
use crate::shared::validation::UPLOAD_ID_REGEX;

/// Multipart chunk upload form, for Swagger UI documentation only.
/// The handler reads the fields with axum's Multipart extractor.
/// Metadata fields must come before `chunk` for the payload to be streamed.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct UploadChunkDto {
    /// Client-chosen session id shared by every chunk of one file
    #[schema(example = "0191b2c4-7d1e-7c3a-9f00-1234567890ab")]
    pub upload_id: String,
    /// Zero-based ordinal of this chunk
    pub chunk_index: u32,
    /// Declared number of chunks in the file
    pub total_chunks: u32,
    /// Destination file name
    #[schema(example = "holiday.mp4")]
    pub file_name: String,
    /// Destination folder, omitted for top level
    pub parent_id: Option<Uuid>,
    /// Chunk bytes
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub chunk: String,
}

/// Acknowledgment of a stored chunk
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChunkAckDto {
    pub upload_id: String,
    pub chunk_index: u32,
    pub received_bytes: u64,
    /// True when this ordinal was already stored and the payload was ignored
    pub already_stored: bool,
}

/// Completion signal for a session
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CompleteUploadDto {
    #[validate(regex(path = *UPLOAD_ID_REGEX, message = "upload_id is invalid"))]
    pub upload_id: String,
    #[validate(length(min = 1, max = 255, message = "file_name must be 1-255 characters"))]
    pub file_name: String,
    /// Destination folder, `null` for top level
    pub parent_id: Option<Uuid>,
    #[validate(range(min = 1, message = "total_chunks must be at least 1"))]
    pub total_chunks: u32,
    /// Content-type hint, defaults to application/octet-stream
    pub content_type: Option<String>,
    /// Declared final size in bytes
    #[validate(range(min = 0, message = "file_size must not be negative"))]
    pub file_size: i64,
}

impl From<CompleteUploadDto> for CompleteUpload {
    fn from(dto: CompleteUploadDto) -> Self {
        Self {
            upload_id: dto.upload_id,
            file_name: dto.file_name,
            parent_id: dto.parent_id,
            total_chunks: dto.total_chunks,
            content_type: dto.content_type,
            file_size: dto.file_size,
        }
    }
}

/// What the server currently holds for a session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadSessionStatusDto {
    pub upload_id: String,
    pub file_name: String,
    pub parent_id: Option<Uuid>,
    pub total_chunks: u32,
    /// Stored ordinals, ascending
    pub received_chunks: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

impl UploadSessionStatusDto {
    pub fn new(meta: SessionMeta, received_chunks: Vec<u32>) -> Self {
        Self {
            upload_id: meta.upload_id,
            file_name: meta.file_name,
            parent_id: meta.parent_id,
            total_chunks: meta.total_chunks,
            received_chunks,
            created_at: meta.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AbortUploadResponseDto {
    pub upload_id: String,
    /// False when no session existed
    pub purged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SweepResultDto {
    /// Sessions inspected
    pub scanned: usize,
    /// Ids of the sessions removed
    pub purged: Vec<String>,
}
