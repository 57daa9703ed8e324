use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Query for a single pre-flight check
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct QuotaQueryDto {
    /// Requested size in bytes
    #[validate(range(min = 0, message = "size must not be negative"))]
    pub size: i64,
}

/// Batch pre-flight request, evaluated once against the combined size
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct BatchQuotaCheckDto {
    #[validate(length(min = 1, message = "sizes must not be empty"))]
    pub sizes: Vec<i64>,
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuotaCheckDto {
    /// Whether `requested` fits into `available`
    pub admit: bool,
    pub used: i64,
    pub limit: i64,
    pub available: i64,
    pub requested: i64,
}

/// Figures carried by a 507 response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuotaExceededDto {
    pub used: i64,
    pub limit: i64,
    pub available: i64,
    pub requested: i64,
}

impl From<QuotaCheckDto> for QuotaExceededDto {
    fn from(check: QuotaCheckDto) -> Self {
        Self {
            used: check.used,
            limit: check.limit,
            available: check.available,
            requested: check.requested,
        }
    }
}

impl fmt::Display for QuotaExceededDto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} bytes, {} of {} used, {} available",
            self.requested, self.used, self.limit, self.available
        )
    }
}
