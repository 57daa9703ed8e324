use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::catalog::models::{CatalogEntry, NewCatalogEntry};
use crate::features::catalog::services::CatalogStore;
use crate::shared::constants::KIND_FOLDER;

/// Postgres-backed catalog
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn consumed_bytes(&self, owner_id: &str) -> Result<i64> {
        let used = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(size_bytes), 0)::BIGINT
            FROM catalog_entries
            WHERE owner_id = $1 AND kind <> $2
            "#,
        )
        .bind(owner_id)
        .bind(KIND_FOLDER)
        .fetch_one(&self.pool)
        .await?;

        Ok(used)
    }

    async fn quota_limit(&self, owner_id: &str) -> Result<Option<i64>> {
        let limit = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT limit_bytes FROM storage_quotas
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(limit)
    }

    async fn folder_exists(&self, owner_id: &str, folder_id: Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM catalog_entries
                WHERE id = $1 AND owner_id = $2 AND kind = $3
            )
            "#,
        )
        .bind(folder_id)
        .bind(owner_id)
        .bind(KIND_FOLDER)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_entry(&self, entry: NewCatalogEntry) -> Result<CatalogEntry> {
        let row = sqlx::query_as::<_, CatalogEntry>(
            r#"
            INSERT INTO catalog_entries (id, owner_id, parent_id, name, kind, size_bytes, content_type, storage_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&entry.owner_id)
        .bind(entry.parent_id)
        .bind(&entry.name)
        .bind(&entry.kind)
        .bind(entry.size_bytes)
        .bind(&entry.content_type)
        .bind(&entry.storage_path)
        .fetch_one(&self.pool)
        .await?;

        info!(
            "Catalog entry saved: id={}, owner={}, kind={}, size={}",
            row.id, row.owner_id, row.kind, row.size_bytes
        );

        Ok(row)
    }

    async fn last_change(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        let last = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(updated_at) FROM catalog_entries
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(last)
    }
}
