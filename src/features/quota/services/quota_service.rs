use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::{AppError, Result};
use crate::features::catalog::services::CatalogStore;
use crate::features::quota::dtos::{QuotaCheckDto, QuotaExceededDto};

/// Answers "does this owner have room for N more bytes".
///
/// Consumption is always recomputed from the committed catalog. The same
/// rule backs the advisory pre-flight and the authoritative check at
/// assembly, so both report consistent figures. Nothing is reserved.
pub struct QuotaService {
    catalog: Arc<dyn CatalogStore>,
    default_limit: i64,
}

impl QuotaService {
    pub fn new(catalog: Arc<dyn CatalogStore>, default_limit: i64) -> Self {
        Self {
            catalog,
            default_limit,
        }
    }

    /// Evaluate a single request
    pub async fn check(&self, owner_id: &str, requested: i64) -> Result<QuotaCheckDto> {
        if requested < 0 {
            return Err(AppError::BadRequest(
                "Requested size must not be negative".to_string(),
            ));
        }

        let used = self.catalog.consumed_bytes(owner_id).await?;
        let limit = self
            .catalog
            .quota_limit(owner_id)
            .await?
            .unwrap_or(self.default_limit);
        let available = (limit - used).max(0);

        let check = QuotaCheckDto {
            admit: requested <= available,
            used,
            limit,
            available,
            requested,
        };

        debug!(
            "Quota check for {}: requested={}, used={}, limit={}, admit={}",
            owner_id, requested, used, limit, check.admit
        );

        Ok(check)
    }

    /// Evaluate a batch once against its combined size
    pub async fn check_batch(&self, owner_id: &str, sizes: &[i64]) -> Result<QuotaCheckDto> {
        if sizes.iter().any(|s| *s < 0) {
            return Err(AppError::BadRequest(
                "Requested sizes must not be negative".to_string(),
            ));
        }

        let combined = sizes
            .iter()
            .try_fold(0i64, |acc, size| acc.checked_add(*size))
            .ok_or_else(|| AppError::BadRequest("Combined size is too large".to_string()))?;

        self.check(owner_id, combined).await
    }

    /// Authoritative check: fails with `QuotaExceeded` when the request does not fit
    pub async fn ensure_capacity(&self, owner_id: &str, requested: i64) -> Result<QuotaCheckDto> {
        let check = self.check(owner_id, requested).await?;

        if !check.admit {
            warn!(
                "Quota exceeded for {}: requested={}, available={}, limit={}",
                owner_id, requested, check.available, check.limit
            );
            return Err(AppError::QuotaExceeded(QuotaExceededDto::from(check)));
        }

        Ok(check)
    }
}
