use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::catalog::models::{CatalogEntry, NewCatalogEntry};

/// Catalog collaborator used by quota accounting and the assembler
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Sum of committed non-folder sizes for the owner
    async fn consumed_bytes(&self, owner_id: &str) -> Result<i64>;

    /// Explicit limit for the owner, `None` when the default applies
    async fn quota_limit(&self, owner_id: &str) -> Result<Option<i64>>;

    async fn folder_exists(&self, owner_id: &str, folder_id: Uuid) -> Result<bool>;

    async fn insert_entry(&self, entry: NewCatalogEntry) -> Result<CatalogEntry>;

    /// Most recent modification time across the owner's entries
    async fn last_change(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>>;
}
