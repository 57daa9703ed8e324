//! In-memory `UploadApi` for queue and watcher tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::api::{ChunkRequest, UploadApi};
use crate::client::error::ClientError;
use crate::features::catalog::dtos::CatalogEntryDto;
use crate::features::quota::dtos::{QuotaCheckDto, QuotaExceededDto};
use crate::features::uploads::dtos::{ChunkAckDto, CompleteUploadDto};
use crate::shared::constants::DEFAULT_CONTENT_TYPE;

pub struct MockApi {
    limit: i64,
    delay: Duration,
    /// Remaining injected failures per chunk index
    chunk_failures: Mutex<HashMap<u32, u32>>,
    /// File names whose chunks always fail
    failing_files: Mutex<HashSet<String>>,
    completion_error: Mutex<Option<QuotaExceededDto>>,
    chunks: Mutex<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
    assembled: Mutex<HashMap<String, Vec<u8>>>,
    changes: Mutex<VecDeque<Result<Option<DateTime<Utc>>, ClientError>>>,
    upload_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            limit: i64::MAX,
            delay: Duration::ZERO,
            chunk_failures: Mutex::new(HashMap::new()),
            failing_files: Mutex::new(HashSet::new()),
            completion_error: Mutex::new(None),
            chunks: Mutex::new(HashMap::new()),
            assembled: Mutex::new(HashMap::new()),
            changes: Mutex::new(VecDeque::new()),
            upload_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Delay every chunk call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` uploads of chunk `index` with a 503
    pub fn fail_chunk(&self, index: u32, times: u32) {
        self.chunk_failures.lock().unwrap().insert(index, times);
    }

    /// Fail every chunk of `file_name` with a network error
    pub fn fail_file(&self, file_name: &str) {
        self.failing_files
            .lock()
            .unwrap()
            .insert(file_name.to_string());
    }

    /// Answer every completion with a 507
    pub fn reject_completion(&self, details: QuotaExceededDto) {
        *self.completion_error.lock().unwrap() = Some(details);
    }

    /// Queue the answers of successive `catalog_changes` calls
    pub fn push_change(&self, answer: Result<Option<DateTime<Utc>>, ClientError>) {
        self.changes.lock().unwrap().push_back(answer);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Bytes of the completed file with this name
    pub fn assembled(&self, file_name: &str) -> Option<Vec<u8>> {
        self.assembled.lock().unwrap().get(file_name).cloned()
    }

    fn quota(&self, requested: i64) -> QuotaCheckDto {
        QuotaCheckDto {
            admit: requested <= self.limit,
            used: 0,
            limit: self.limit,
            available: self.limit,
            requested,
        }
    }
}

#[async_trait]
impl UploadApi for MockApi {
    async fn check_quota(&self, size: i64) -> Result<QuotaCheckDto, ClientError> {
        Ok(self.quota(size))
    }

    async fn check_quota_batch(&self, sizes: &[i64]) -> Result<QuotaCheckDto, ClientError> {
        Ok(self.quota(sizes.iter().sum()))
    }

    async fn upload_chunk(&self, chunk: ChunkRequest) -> Result<ChunkAckDto, ClientError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let file_fails = {
            let failing = self.failing_files.lock().unwrap();
            failing.contains(&chunk.file_name)
        };
        if file_fails {
            return Err(ClientError::Network("connection reset".to_string()));
        }
        {
            let mut failures = self.chunk_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&chunk.chunk_index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ClientError::Status {
                        status: 503,
                        message: "unavailable".to_string(),
                    });
                }
            }
        }

        let received_bytes = chunk.data.len() as u64;
        let mut chunks = self.chunks.lock().unwrap();
        let session = chunks.entry(chunk.upload_id.clone()).or_default();
        let already_stored = session.contains_key(&chunk.chunk_index);
        session.entry(chunk.chunk_index).or_insert(chunk.data);

        Ok(ChunkAckDto {
            upload_id: chunk.upload_id,
            chunk_index: chunk.chunk_index,
            received_bytes,
            already_stored,
        })
    }

    async fn complete(&self, request: &CompleteUploadDto) -> Result<CatalogEntryDto, ClientError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(details) = *self.completion_error.lock().unwrap() {
            return Err(ClientError::QuotaExceeded(details));
        }

        let session = self
            .chunks
            .lock()
            .unwrap()
            .remove(&request.upload_id)
            .unwrap_or_default();
        if session.len() != request.total_chunks as usize {
            return Err(ClientError::Status {
                status: 409,
                message: "missing chunks".to_string(),
            });
        }

        let data: Vec<u8> = session.into_values().flatten().collect();
        let entry = CatalogEntryDto {
            id: Uuid::new_v4(),
            parent_id: request.parent_id,
            name: request.file_name.clone(),
            size: data.len() as i64,
            content_type: request
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            created_at: Utc::now(),
        };
        self.assembled
            .lock()
            .unwrap()
            .insert(request.file_name.clone(), data);
        Ok(entry)
    }

    async fn abort(&self, upload_id: &str) -> Result<bool, ClientError> {
        Ok(self.chunks.lock().unwrap().remove(upload_id).is_some())
    }

    async fn catalog_changes(&self) -> Result<Option<DateTime<Utc>>, ClientError> {
        self.changes.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}
