use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::catalog::models::{CatalogEntry, NewCatalogEntry};
use crate::features::catalog::services::CatalogStore;
use crate::shared::constants::KIND_FOLDER;

#[derive(Default)]
struct CatalogState {
    entries: Vec<CatalogEntry>,
    limits: HashMap<String, i64>,
}

/// In-process catalog for local runs without a database
#[derive(Default)]
pub struct MemoryCatalogStore {
    state: RwLock<CatalogState>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_limit(&self, owner_id: &str, limit_bytes: i64) {
        self.state
            .write()
            .await
            .limits
            .insert(owner_id.to_string(), limit_bytes);
    }

    /// Entries belonging to `owner_id`, in insertion order
    pub async fn entries(&self, owner_id: &str) -> Vec<CatalogEntry> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn consumed_bytes(&self, owner_id: &str) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id && e.kind != KIND_FOLDER)
            .map(|e| e.size_bytes)
            .sum())
    }

    async fn quota_limit(&self, owner_id: &str) -> Result<Option<i64>> {
        Ok(self.state.read().await.limits.get(owner_id).copied())
    }

    async fn folder_exists(&self, owner_id: &str, folder_id: Uuid) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .any(|e| e.id == folder_id && e.owner_id == owner_id && e.kind == KIND_FOLDER))
    }

    async fn insert_entry(&self, entry: NewCatalogEntry) -> Result<CatalogEntry> {
        let now = Utc::now();
        let row = CatalogEntry {
            id: Uuid::now_v7(),
            owner_id: entry.owner_id,
            parent_id: entry.parent_id,
            name: entry.name,
            kind: entry.kind,
            size_bytes: entry.size_bytes,
            content_type: entry.content_type,
            storage_path: entry.storage_path,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.entries.push(row.clone());
        Ok(row)
    }

    async fn last_change(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| e.updated_at)
            .max())
    }
}
