use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database model for catalog entries (files and folders)
#[derive(Debug, Clone, FromRow)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub kind: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a new catalog row; `None` parent means top level
#[derive(Debug, Clone)]
pub struct NewCatalogEntry {
    pub owner_id: String,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub kind: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub storage_path: Option<String>,
}
