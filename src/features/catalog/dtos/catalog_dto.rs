use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::features::catalog::models::CatalogEntry;
use crate::shared::constants::DEFAULT_CONTENT_TYPE;

/// Catalog entry returned after a successful assembly
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogEntryDto {
    pub id: Uuid,
    /// Containing folder, `null` for top level
    pub parent_id: Option<Uuid>,
    pub name: String,
    /// Size in bytes
    pub size: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<CatalogEntry> for CatalogEntryDto {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: entry.id,
            parent_id: entry.parent_id,
            name: entry.name,
            size: entry.size_bytes,
            content_type: entry
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            created_at: entry.created_at,
        }
    }
}

/// Last-known-change marker for an owner's catalog
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogChangesDto {
    /// `null` while the owner has no entries
    pub last_change: Option<DateTime<Utc>>,
}
