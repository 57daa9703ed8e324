//! On-disk layout of upload sessions
//!
//! A session lives in `uploads/<upload_id>/` and holds `session.json` plus
//! one `<ordinal>.chunk` file per received chunk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::modules::storage::LocalStorage;
use crate::shared::constants::{CHUNK_EXTENSION, SESSION_META_FILE, UPLOADS_DIR};

/// Declared facts about a session, written with its first chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub upload_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub parent_id: Option<Uuid>,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
}

pub struct SessionStore {
    storage: Arc<LocalStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<LocalStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn session_key(upload_id: &str) -> String {
        format!("{}/{}", UPLOADS_DIR, upload_id)
    }

    pub fn chunk_key(upload_id: &str, chunk_index: u32) -> String {
        format!(
            "{}/{}/{}.{}",
            UPLOADS_DIR, upload_id, chunk_index, CHUNK_EXTENSION
        )
    }

    fn meta_key(upload_id: &str) -> String {
        format!("{}/{}/{}", UPLOADS_DIR, upload_id, SESSION_META_FILE)
    }

    pub async fn load_meta(&self, upload_id: &str) -> Result<Option<SessionMeta>> {
        let Some(raw) = self.storage.read(&Self::meta_key(upload_id)).await? else {
            return Ok(None);
        };

        let meta = serde_json::from_slice(&raw).map_err(|e| {
            AppError::Internal(format!(
                "Corrupt metadata for upload session {}: {}",
                upload_id, e
            ))
        })?;
        Ok(Some(meta))
    }

    /// Metadata of a session the caller owns, `None` when it does not exist
    pub async fn load_owned(
        &self,
        upload_id: &str,
        owner_id: &str,
    ) -> Result<Option<SessionMeta>> {
        match self.load_meta(upload_id).await? {
            Some(meta) if meta.owner_id != owner_id => Err(AppError::Forbidden(
                "Upload session belongs to another user".to_string(),
            )),
            other => Ok(other),
        }
    }

    /// Materialize the session area and persist its metadata.
    ///
    /// Metadata is write-once: when a concurrent request created the session
    /// first, the stored metadata is returned instead of `meta`.
    pub async fn create(&self, meta: &SessionMeta) -> Result<SessionMeta> {
        let raw = serde_json::to_vec(meta)
            .map_err(|e| AppError::Internal(format!("Failed to encode session metadata: {}", e)))?;

        self.storage
            .create_dir(&Self::session_key(&meta.upload_id))
            .await?;
        let created = self
            .storage
            .put_bytes(&Self::meta_key(&meta.upload_id), &raw)
            .await?;

        if !created {
            debug!(
                "Upload session {} was created concurrently, using stored metadata",
                meta.upload_id
            );
            let existing = self.load_meta(&meta.upload_id).await?;
            let message = format!("Upload session {} lost its metadata", meta.upload_id);
            return existing.ok_or(AppError::Internal(message));
        }

        info!(
            "Upload session created: id={}, owner={}, total_chunks={}",
            meta.upload_id, meta.owner_id, meta.total_chunks
        );
        Ok(meta.clone())
    }

    pub async fn chunk_exists(&self, upload_id: &str, chunk_index: u32) -> Result<bool> {
        self.storage
            .exists(&Self::chunk_key(upload_id, chunk_index))
            .await
    }

    /// Ordinals currently stored for the session, ascending
    pub async fn received_chunks(&self, upload_id: &str) -> Result<Vec<u32>> {
        let names = self.storage.list_dir(&Self::session_key(upload_id)).await?;
        let suffix = format!(".{}", CHUNK_EXTENSION);

        let mut ordinals: Vec<u32> = names
            .iter()
            .filter_map(|name| name.strip_suffix(&suffix))
            .filter_map(|stem| stem.parse().ok())
            .collect();
        ordinals.sort_unstable();
        Ok(ordinals)
    }

    /// Delete the whole session area. Returns `false` when nothing was there.
    pub async fn purge(&self, upload_id: &str) -> Result<bool> {
        let removed = self
            .storage
            .delete_dir(&Self::session_key(upload_id))
            .await?;
        if removed {
            debug!("Upload session purged: {}", upload_id);
        }
        Ok(removed)
    }

    /// Ids of every session area on disk
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        self.storage.list_dir(UPLOADS_DIR).await
    }

    /// Time of the last chunk or metadata write
    pub async fn last_activity(&self, upload_id: &str) -> Result<Option<SystemTime>> {
        self.storage.modified(&Self::session_key(upload_id)).await
    }
}
