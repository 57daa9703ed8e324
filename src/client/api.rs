use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::client::error::ClientError;
use crate::features::catalog::dtos::{CatalogChangesDto, CatalogEntryDto};
use crate::features::quota::dtos::{BatchQuotaCheckDto, QuotaCheckDto, QuotaExceededDto};
use crate::features::uploads::dtos::{AbortUploadResponseDto, ChunkAckDto, CompleteUploadDto};
use crate::shared::types::ApiResponse;

/// One chunk on its way to the server
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub parent_id: Option<Uuid>,
    pub data: Vec<u8>,
}

/// Server operations the transfer queue depends on
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn check_quota(&self, size: i64) -> Result<QuotaCheckDto, ClientError>;

    async fn check_quota_batch(&self, sizes: &[i64]) -> Result<QuotaCheckDto, ClientError>;

    async fn upload_chunk(&self, chunk: ChunkRequest) -> Result<ChunkAckDto, ClientError>;

    async fn complete(&self, request: &CompleteUploadDto) -> Result<CatalogEntryDto, ClientError>;

    async fn abort(&self, upload_id: &str) -> Result<bool, ClientError>;

    async fn catalog_changes(&self) -> Result<Option<DateTime<Utc>>, ClientError>;
}

/// `UploadApi` over HTTP
pub struct HttpUploadApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpUploadApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(concat!("cloudvault-upload/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = self.authorized(builder).send().await?;
        decode(response).await
    }
}

/// Unwrap the response envelope, mapping 507 to `QuotaExceeded`
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.bytes().await?;

    if status == StatusCode::INSUFFICIENT_STORAGE {
        let envelope: ApiResponse<QuotaExceededDto> =
            serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        return match envelope.data {
            Some(details) => Err(ClientError::QuotaExceeded(details)),
            None => Err(ClientError::Status {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_default(),
            }),
        };
    }

    if !status.is_success() {
        let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
        return Err(ClientError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiResponse<T> =
        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    envelope
        .data
        .ok_or_else(|| ClientError::InvalidResponse("response carried no data".to_string()))
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn check_quota(&self, size: i64) -> Result<QuotaCheckDto, ClientError> {
        let request = self
            .client
            .get(self.url("/api/quota"))
            .query(&[("size", size)]);
        self.send(request).await
    }

    async fn check_quota_batch(&self, sizes: &[i64]) -> Result<QuotaCheckDto, ClientError> {
        let request = self
            .client
            .post(self.url("/api/quota/batch"))
            .json(&BatchQuotaCheckDto {
                sizes: sizes.to_vec(),
            });
        self.send(request).await
    }

    async fn upload_chunk(&self, chunk: ChunkRequest) -> Result<ChunkAckDto, ClientError> {
        // Metadata first so the server can stream the payload to disk
        let mut form = Form::new()
            .text("upload_id", chunk.upload_id)
            .text("chunk_index", chunk.chunk_index.to_string())
            .text("total_chunks", chunk.total_chunks.to_string())
            .text("file_name", chunk.file_name);
        if let Some(parent_id) = chunk.parent_id {
            form = form.text("parent_id", parent_id.to_string());
        }
        form = form.part("chunk", Part::bytes(chunk.data).file_name("chunk"));

        let request = self
            .client
            .post(self.url("/api/uploads/chunk"))
            .multipart(form);
        self.send(request).await
    }

    async fn complete(&self, request: &CompleteUploadDto) -> Result<CatalogEntryDto, ClientError> {
        let request = self
            .client
            .post(self.url("/api/uploads/complete"))
            .json(request);
        self.send(request).await
    }

    async fn abort(&self, upload_id: &str) -> Result<bool, ClientError> {
        let request = self
            .client
            .delete(self.url(&format!("/api/uploads/{}", upload_id)));
        let response: AbortUploadResponseDto = self.send(request).await?;
        Ok(response.purged)
    }

    async fn catalog_changes(&self) -> Result<Option<DateTime<Utc>>, ClientError> {
        let request = self.client.get(self.url("/api/catalog/changes"));
        let changes: CatalogChangesDto = self.send(request).await?;
        Ok(changes.last_change)
    }
}
