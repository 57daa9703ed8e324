use axum::body::Bytes;
use chrono::Utc;
use futures::Stream;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::config::UploadConfig;
use crate::core::error::{AppError, Result};
use crate::features::uploads::dtos::ChunkAckDto;
use crate::features::uploads::services::{SessionMeta, SessionStore};
use crate::modules::storage::PutOutcome;
use crate::shared::validation::{is_valid_file_name, is_valid_upload_id};

/// Metadata sent alongside one chunk payload
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub parent_id: Option<Uuid>,
}

/// Persists inbound chunks, one standalone file per ordinal.
///
/// Chunks are write-once: a re-sent ordinal that is already stored is
/// acknowledged without touching the stored bytes.
pub struct ChunkReceiver {
    sessions: Arc<SessionStore>,
    config: UploadConfig,
}

impl ChunkReceiver {
    pub fn new(sessions: Arc<SessionStore>, config: UploadConfig) -> Self {
        Self { sessions, config }
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.config.max_chunk_bytes
    }

    fn validate(&self, upload: &ChunkUpload) -> Result<()> {
        if !is_valid_upload_id(&upload.upload_id) {
            return Err(AppError::BadRequest(
                "upload_id must be 8-128 letters, digits, '-' or '_'".to_string(),
            ));
        }
        if !is_valid_file_name(&upload.file_name) {
            return Err(AppError::BadRequest("file_name is invalid".to_string()));
        }
        if upload.total_chunks == 0 || upload.total_chunks > self.config.max_chunks {
            return Err(AppError::BadRequest(format!(
                "total_chunks must be between 1 and {}",
                self.config.max_chunks
            )));
        }
        if upload.chunk_index >= upload.total_chunks {
            return Err(AppError::BadRequest(format!(
                "chunk_index {} is out of range for {} chunks",
                upload.chunk_index, upload.total_chunks
            )));
        }
        Ok(())
    }

    /// Store one chunk. A success result means the bytes are durably on disk.
    pub async fn store<S, E>(
        &self,
        owner_id: &str,
        upload: &ChunkUpload,
        payload: S,
    ) -> Result<ChunkAckDto>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        self.validate(upload)?;

        let meta = match self.sessions.load_owned(&upload.upload_id, owner_id).await? {
            Some(meta) => meta,
            None => {
                let meta = SessionMeta {
                    upload_id: upload.upload_id.clone(),
                    owner_id: owner_id.to_string(),
                    file_name: upload.file_name.clone(),
                    parent_id: upload.parent_id,
                    total_chunks: upload.total_chunks,
                    created_at: Utc::now(),
                };
                self.sessions.create(&meta).await?
            }
        };
        if meta.owner_id != owner_id {
            return Err(AppError::Forbidden(
                "Upload session belongs to another user".to_string(),
            ));
        }
        if meta.total_chunks != upload.total_chunks {
            return Err(AppError::BadRequest(format!(
                "total_chunks {} does not match the session's declared {}",
                upload.total_chunks, meta.total_chunks
            )));
        }

        let key = SessionStore::chunk_key(&upload.upload_id, upload.chunk_index);
        if self.sessions.storage().exists(&key).await? {
            return self.already_stored(upload, &key).await;
        }

        let outcome = self
            .sessions
            .storage()
            .put_stream(&key, payload, self.config.max_chunk_bytes)
            .await?;
        let received_bytes = match outcome {
            PutOutcome::Stored(written) => written,
            PutOutcome::AlreadyExists => return self.already_stored(upload, &key).await,
        };

        debug!(
            "Chunk {}/{} of session {} stored ({} bytes)",
            upload.chunk_index + 1,
            upload.total_chunks,
            upload.upload_id,
            received_bytes
        );

        Ok(ChunkAckDto {
            upload_id: upload.upload_id.clone(),
            chunk_index: upload.chunk_index,
            received_bytes,
            already_stored: false,
        })
    }

    /// Acknowledge a re-sent ordinal with the size of the bytes kept on disk
    async fn already_stored(&self, upload: &ChunkUpload, key: &str) -> Result<ChunkAckDto> {
        debug!(
            "Chunk {} of session {} already stored, skipping",
            upload.chunk_index, upload.upload_id
        );
        let received_bytes = self.sessions.storage().size(key).await?;
        Ok(ChunkAckDto {
            upload_id: upload.upload_id.clone(),
            chunk_index: upload.chunk_index,
            received_bytes,
            already_stored: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::storage::LocalStorage;
    use std::convert::Infallible;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn receiver(dir: &TempDir, max_chunk_bytes: usize) -> (Arc<SessionStore>, ChunkReceiver) {
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let sessions = Arc::new(SessionStore::new(storage));
        let config = UploadConfig {
            max_chunk_bytes,
            max_chunks: 10,
            ..UploadConfig::default()
        };
        (sessions.clone(), ChunkReceiver::new(sessions, config))
    }

    fn upload(index: u32, total: u32) -> ChunkUpload {
        ChunkUpload {
            upload_id: "session-0001".to_string(),
            chunk_index: index,
            total_chunks: total,
            file_name: "notes.txt".to_string(),
            parent_id: None,
        }
    }

    fn payload(
        data: &'static [u8],
    ) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
        futures::stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_are_accepted() {
        let dir = TempDir::new().unwrap();
        let (sessions, receiver) = receiver(&dir, 1024);

        receiver
            .store("alice", &upload(2, 3), payload(b"cc"))
            .await
            .unwrap();
        receiver
            .store("alice", &upload(0, 3), payload(b"aa"))
            .await
            .unwrap();

        assert_eq!(
            sessions.received_chunks("session-0001").await.unwrap(),
            vec![0, 2]
        );
        let meta = sessions.load_meta("session-0001").await.unwrap().unwrap();
        assert_eq!(meta.owner_id, "alice");
        assert_eq!(meta.total_chunks, 3);
    }

    #[tokio::test]
    async fn test_resent_chunk_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let (sessions, receiver) = receiver(&dir, 1024);

        let first = receiver
            .store("alice", &upload(0, 2), payload(b"original"))
            .await
            .unwrap();
        assert!(!first.already_stored);
        let again = receiver
            .store("alice", &upload(0, 2), payload(b"changed!!"))
            .await
            .unwrap();
        assert!(again.already_stored);
        assert_eq!(again.received_bytes, 8);

        let stored = sessions
            .storage()
            .read(&SessionStore::chunk_key("session-0001", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, b"original".to_vec());
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let dir = TempDir::new().unwrap();
        let (_sessions, receiver) = receiver(&dir, 1024);

        let out_of_range = receiver.store("alice", &upload(3, 3), payload(b"x")).await;
        assert!(matches!(out_of_range, Err(AppError::BadRequest(_))));

        let too_many = receiver.store("alice", &upload(0, 11), payload(b"x")).await;
        assert!(matches!(too_many, Err(AppError::BadRequest(_))));

        let mut bad_id = upload(0, 1);
        bad_id.upload_id = "../etc".to_string();
        assert!(matches!(
            receiver.store("alice", &bad_id, payload(b"x")).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_session_conflicts() {
        let dir = TempDir::new().unwrap();
        let (_sessions, receiver) = receiver(&dir, 1024);
        receiver
            .store("alice", &upload(0, 3), payload(b"a"))
            .await
            .unwrap();

        assert!(matches!(
            receiver.store("bob", &upload(1, 3), payload(b"b")).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            receiver.store("alice", &upload(1, 4), payload(b"b")).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_leaves_prior_chunks() {
        let dir = TempDir::new().unwrap();
        let (sessions, receiver) = receiver(&dir, 4);

        receiver
            .store("alice", &upload(0, 2), payload(b"abcd"))
            .await
            .unwrap();
        let result = receiver
            .store("alice", &upload(1, 2), payload(b"abcdef"))
            .await;

        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert_eq!(
            sessions.received_chunks("session-0001").await.unwrap(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_concurrent_resend_keeps_first_finished_chunk() {
        let dir = TempDir::new().unwrap();
        let (sessions, receiver) = receiver(&dir, 1024);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Stalls after the receiver has checked for an existing chunk
        let slow = futures::stream::once(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok::<_, Infallible>(Bytes::from_static(b"SLOW-FIRST"))
        });
        let slow_upload = upload(0, 2);
        let fast_upload = upload(0, 2);

        let slow_store = receiver.store("alice", &slow_upload, slow);
        let fast_store = async {
            started_rx.await.unwrap();
            let ack = receiver
                .store("alice", &fast_upload, payload(b"fast-second"))
                .await;
            release_tx.send(()).unwrap();
            ack
        };
        let (slow_ack, fast_ack) = tokio::join!(slow_store, fast_store);

        let fast_ack = fast_ack.unwrap();
        assert!(!fast_ack.already_stored);
        assert_eq!(fast_ack.received_bytes, 11);

        let slow_ack = slow_ack.unwrap();
        assert!(slow_ack.already_stored);
        assert_eq!(slow_ack.received_bytes, 11);

        let stored = sessions
            .storage()
            .read(&SessionStore::chunk_key("session-0001", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, b"fast-second".to_vec());
        assert_eq!(
            sessions.received_chunks("session-0001").await.unwrap(),
            vec![0]
        );
    }
}
