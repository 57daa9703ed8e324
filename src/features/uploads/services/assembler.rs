use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::config::UploadConfig;
use crate::core::error::{AppError, Result};
use crate::features::catalog::dtos::CatalogEntryDto;
use crate::features::catalog::models::NewCatalogEntry;
use crate::features::catalog::services::CatalogStore;
use crate::features::quota::services::QuotaService;
use crate::features::uploads::services::SessionStore;
use crate::shared::constants::{DEFAULT_CONTENT_TYPE, FILES_DIR, KIND_FILE};
use crate::shared::validation::{is_valid_file_name, is_valid_upload_id};

/// Completion signal for one upload session
#[derive(Debug, Clone)]
pub struct CompleteUpload {
    pub upload_id: String,
    pub file_name: String,
    pub parent_id: Option<Uuid>,
    pub total_chunks: u32,
    pub content_type: Option<String>,
    pub file_size: i64,
}

/// Turns a complete session into a catalog-visible artifact.
///
/// The quota is re-checked against the committed catalog before any bytes
/// move. Chunks are streamed in ordinal order into `files/<id>.part` and
/// deleted as soon as they are consumed; the artifact is renamed into place
/// and registered only after its realized size matches the declared one.
pub struct Assembler {
    sessions: Arc<SessionStore>,
    quota: Arc<QuotaService>,
    catalog: Arc<dyn CatalogStore>,
    config: UploadConfig,
    in_progress: Mutex<HashSet<String>>,
}

/// Releases the in-progress claim on drop
struct AssemblyClaim<'a> {
    set: &'a Mutex<HashSet<String>>,
    upload_id: String,
}

impl Drop for AssemblyClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.upload_id);
        }
    }
}

impl Assembler {
    pub fn new(
        sessions: Arc<SessionStore>,
        quota: Arc<QuotaService>,
        catalog: Arc<dyn CatalogStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            sessions,
            quota,
            catalog,
            config,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    fn artifact_key(id: Uuid) -> String {
        format!("{}/{}", FILES_DIR, id)
    }

    fn part_key(id: Uuid) -> String {
        format!("{}/{}.part", FILES_DIR, id)
    }

    fn claim(&self, upload_id: &str) -> Result<AssemblyClaim<'_>> {
        let mut set = self
            .in_progress
            .lock()
            .map_err(|_| AppError::Internal("Assembly registry poisoned".to_string()))?;
        if !set.insert(upload_id.to_string()) {
            return Err(AppError::Conflict(
                "Upload session is already being assembled".to_string(),
            ));
        }
        Ok(AssemblyClaim {
            set: &self.in_progress,
            upload_id: upload_id.to_string(),
        })
    }

    fn validate(&self, request: &CompleteUpload) -> Result<()> {
        if !is_valid_upload_id(&request.upload_id) {
            return Err(AppError::BadRequest("upload_id is invalid".to_string()));
        }
        if !is_valid_file_name(&request.file_name) {
            return Err(AppError::BadRequest("file_name is invalid".to_string()));
        }
        if request.total_chunks == 0 || request.total_chunks > self.config.max_chunks {
            return Err(AppError::BadRequest(format!(
                "total_chunks must be between 1 and {}",
                self.config.max_chunks
            )));
        }
        if request.file_size < 0 {
            return Err(AppError::BadRequest(
                "file_size must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Authoritatively commit a session, returning the new catalog entry
    pub async fn complete(
        &self,
        owner_id: &str,
        request: CompleteUpload,
    ) -> Result<CatalogEntryDto> {
        self.validate(&request)?;
        let _claim = self.claim(&request.upload_id)?;
        let upload_id = request.upload_id.as_str();

        let meta = self
            .sessions
            .load_owned(upload_id, owner_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload session {} not found", upload_id)))?;

        if meta.total_chunks != request.total_chunks {
            return Err(AppError::BadRequest(format!(
                "total_chunks {} does not match the session's declared {}",
                request.total_chunks, meta.total_chunks
            )));
        }

        if let Some(parent_id) = request.parent_id {
            if !self.catalog.folder_exists(owner_id, parent_id).await? {
                return Err(AppError::NotFound(format!(
                    "Parent folder {} not found",
                    parent_id
                )));
            }
        }

        let capacity = self.quota.ensure_capacity(owner_id, request.file_size);
        if let Err(e) = capacity.await {
            if matches!(e, AppError::QuotaExceeded(_)) {
                self.purge_quietly(upload_id).await;
            }
            return Err(e);
        }

        // Refuse before writing anything when the set is incomplete
        for index in 0..request.total_chunks {
            if !self.sessions.chunk_exists(upload_id, index).await? {
                warn!(
                    "Chunk {} of {} missing for session {}, assembly refused",
                    index, request.total_chunks, upload_id
                );
                return Err(AppError::Conflict(format!(
                    "Chunk {} of {} is missing",
                    index, request.total_chunks
                )));
            }
        }

        info!(
            "Assembling session {} ({} chunks, {} bytes)",
            upload_id, request.total_chunks, request.file_size
        );

        let artifact_id = Uuid::now_v7();
        let part_key = Self::part_key(artifact_id);
        let artifact_key = Self::artifact_key(artifact_id);
        let storage = self.sessions.storage();

        let assembled = self.write_artifact(&part_key, upload_id, request.total_chunks);
        let written = match assembled.await {
            Ok(written) => written,
            Err(e) => {
                error!("Assembly of session {} failed: {}", upload_id, e);
                self.discard(&part_key).await;
                self.purge_quietly(upload_id).await;
                return Err(e);
            }
        };

        if written != request.file_size as u64 {
            warn!(
                "Assembled size {} differs from declared {} for session {}",
                written, request.file_size, upload_id
            );
            self.discard(&part_key).await;
            self.purge_quietly(upload_id).await;
            return Err(AppError::BadRequest(format!(
                "Assembled size {} does not match declared size {}",
                written, request.file_size
            )));
        }

        if let Err(e) = storage.rename(&part_key, &artifact_key).await {
            self.discard(&part_key).await;
            self.purge_quietly(upload_id).await;
            return Err(e);
        }
        self.purge_quietly(upload_id).await;

        let content_type = request
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let entry = match self
            .catalog
            .insert_entry(NewCatalogEntry {
                owner_id: owner_id.to_string(),
                parent_id: request.parent_id,
                name: request.file_name,
                kind: KIND_FILE.to_string(),
                size_bytes: request.file_size,
                content_type: Some(content_type),
                storage_path: Some(artifact_key.clone()),
            })
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                self.discard(&artifact_key).await;
                return Err(e);
            }
        };

        info!(
            "Session {} assembled into {} ({} bytes)",
            upload_id, entry.id, entry.size_bytes
        );

        Ok(CatalogEntryDto::from(entry))
    }

    /// Stream every chunk into the part file, deleting each once consumed
    async fn write_artifact(
        &self,
        part_key: &str,
        upload_id: &str,
        total_chunks: u32,
    ) -> Result<u64> {
        let storage = self.sessions.storage();
        let mut out = storage.open_append(part_key).await?;
        let mut written = 0u64;

        for index in 0..total_chunks {
            let chunk_key = SessionStore::chunk_key(upload_id, index);
            if !storage.exists(&chunk_key).await? {
                return Err(AppError::Conflict(format!(
                    "Chunk {} of {} disappeared during assembly",
                    index, total_chunks
                )));
            }
            written += storage.copy_into(&chunk_key, &mut out).await?;
            storage.delete(&chunk_key).await?;
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(written)
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.sessions.storage().delete(key).await {
            error!("Failed to remove artifact {}: {}", key, e);
        }
    }

    async fn purge_quietly(&self, upload_id: &str) {
        if let Err(e) = self.sessions.purge(upload_id).await {
            error!("Failed to purge upload session {}: {}", upload_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::catalog::services::MemoryCatalogStore;
    use crate::features::uploads::services::{ChunkReceiver, ChunkUpload};
    use crate::modules::storage::LocalStorage;
    use axum::body::Bytes;
    use std::convert::Infallible;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: Arc<LocalStorage>,
        sessions: Arc<SessionStore>,
        catalog: Arc<MemoryCatalogStore>,
        receiver: ChunkReceiver,
        assembler: Assembler,
    }

    fn fixture(default_limit: i64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let sessions = Arc::new(SessionStore::new(storage.clone()));
        let catalog = Arc::new(MemoryCatalogStore::new());
        let quota = Arc::new(QuotaService::new(catalog.clone(), default_limit));
        let config = UploadConfig::default();
        Fixture {
            _dir: dir,
            storage,
            sessions: sessions.clone(),
            catalog: catalog.clone(),
            receiver: ChunkReceiver::new(sessions.clone(), config.clone()),
            assembler: Assembler::new(sessions, quota, catalog, config),
        }
    }

    async fn send(fx: &Fixture, upload_id: &str, index: u32, total: u32, data: Vec<u8>) {
        let upload = ChunkUpload {
            upload_id: upload_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            file_name: "data.bin".to_string(),
            parent_id: None,
        };
        let payload = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(data))]);
        fx.receiver.store("alice", &upload, payload).await.unwrap();
    }

    fn request(upload_id: &str, total: u32, size: i64) -> CompleteUpload {
        CompleteUpload {
            upload_id: upload_id.to_string(),
            file_name: "data.bin".to_string(),
            parent_id: None,
            total_chunks: total,
            content_type: None,
            file_size: size,
        }
    }

    #[tokio::test]
    async fn test_assembly_concatenates_in_order_and_cleans_up() {
        let fx = fixture(1_000_000);
        // Deliberately out of order
        send(&fx, "session-0001", 1, 3, b"world".to_vec()).await;
        send(&fx, "session-0001", 2, 3, b"!".to_vec()).await;
        send(&fx, "session-0001", 0, 3, b"hello ".to_vec()).await;

        let entry = fx
            .assembler
            .complete("alice", request("session-0001", 3, 12))
            .await
            .unwrap();

        assert_eq!(entry.size, 12);
        assert_eq!(entry.content_type, DEFAULT_CONTENT_TYPE);
        let rows = fx.catalog.entries("alice").await;
        assert_eq!(rows.len(), 1);
        let path = rows[0].storage_path.clone().unwrap();
        assert_eq!(
            fx.storage.read(&path).await.unwrap().unwrap(),
            b"hello world!".to_vec()
        );
        assert!(fx.sessions.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_sessions_yield_identical_artifacts() {
        let fx = fixture(1_000_000);
        let chunks: Vec<Vec<u8>> = vec![vec![7u8; 100], vec![8u8; 100], vec![9u8; 37]];
        for upload_id in ["session-aaaa", "session-bbbb"] {
            for (i, data) in chunks.iter().enumerate() {
                send(&fx, upload_id, i as u32, 3, data.clone()).await;
            }
        }

        for upload_id in ["session-aaaa", "session-bbbb"] {
            fx.assembler
                .complete("alice", request(upload_id, 3, 237))
                .await
                .unwrap();
        }

        let rows = fx.catalog.entries("alice").await;
        let first_path = rows[0].storage_path.as_deref().unwrap();
        let second_path = rows[1].storage_path.as_deref().unwrap();
        let first = fx.storage.read(first_path).await.unwrap();
        let second = fx.storage.read(second_path).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(rows[0].storage_path, rows[1].storage_path);
    }

    #[tokio::test]
    async fn test_quota_rejection_purges_session() {
        let fx = fixture(0);
        fx.catalog.set_limit("alice", 1_000_000).await;
        fx.catalog
            .insert_entry(NewCatalogEntry {
                owner_id: "alice".to_string(),
                parent_id: None,
                name: "existing".to_string(),
                kind: KIND_FILE.to_string(),
                size_bytes: 900_000,
                content_type: None,
                storage_path: None,
            })
            .await
            .unwrap();
        send(&fx, "session-0001", 0, 1, vec![0u8; 1000]).await;

        let result = fx
            .assembler
            .complete("alice", request("session-0001", 1, 200_000))
            .await;

        match result {
            Err(AppError::QuotaExceeded(details)) => assert_eq!(details.available, 100_000),
            other => panic!("expected quota rejection, got {:?}", other),
        }
        assert_eq!(fx.catalog.entries("alice").await.len(), 1);
        assert!(fx
            .sessions
            .received_chunks("session-0001")
            .await
            .unwrap()
            .is_empty());
        assert!(fx.storage.list_dir(FILES_DIR).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_refuses_assembly() {
        let fx = fixture(1_000_000);
        for index in [0u32, 1, 3, 4] {
            send(&fx, "session-0001", index, 5, vec![1u8; 10]).await;
        }

        let result = fx
            .assembler
            .complete("alice", request("session-0001", 5, 50))
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(fx.catalog.entries("alice").await.is_empty());
        assert!(fx.storage.list_dir(FILES_DIR).await.unwrap().is_empty());
        // Received chunks stay for a corrected retry or the sweeper
        assert_eq!(
            fx.sessions.received_chunks("session-0001").await.unwrap(),
            vec![0, 1, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_no_artifact() {
        let fx = fixture(1_000_000);
        send(&fx, "session-0001", 0, 1, vec![1u8; 10]).await;

        let result = fx
            .assembler
            .complete("alice", request("session-0001", 1, 11))
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(fx.catalog.entries("alice").await.is_empty());
        assert!(fx.storage.list_dir(FILES_DIR).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_and_parent() {
        let fx = fixture(1_000_000);
        let unknown = fx
            .assembler
            .complete("alice", request("session-none", 1, 0))
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));

        send(&fx, "session-0001", 0, 1, vec![1u8; 4]).await;
        let mut with_parent = request("session-0001", 1, 4);
        with_parent.parent_id = Some(Uuid::new_v4());
        assert!(matches!(
            fx.assembler.complete("alice", with_parent).await,
            Err(AppError::NotFound(_))
        ));
        let foreign = fx
            .assembler
            .complete("bob", request("session-0001", 1, 4))
            .await;
        assert!(matches!(foreign, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_empty_file_assembles() {
        let fx = fixture(1_000_000);
        send(&fx, "session-0001", 0, 1, Vec::new()).await;

        let entry = fx
            .assembler
            .complete("alice", request("session-0001", 1, 0))
            .await
            .unwrap();
        assert_eq!(entry.size, 0);
    }
}
