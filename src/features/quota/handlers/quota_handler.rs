use axum::{extract::State, Json};
use std::sync::Arc;
use validator::Validate;

use crate::core::error::AppError;
use crate::core::extractor::{AppJson, AppQuery};
use crate::features::auth::model::AuthenticatedUser;
use crate::features::quota::dtos::{BatchQuotaCheckDto, QuotaCheckDto, QuotaQueryDto};
use crate::features::quota::services::QuotaService;
use crate::shared::types::ApiResponse;

/// Advisory pre-flight check for one file
///
/// A positive answer does not reserve capacity.
#[utoipa::path(
    get,
    path = "/api/quota",
    tag = "quota",
    params(QuotaQueryDto),
    responses(
        (status = 200, description = "Quota figures", body = ApiResponse<QuotaCheckDto>),
        (status = 400, description = "Invalid size"),
        (status = 401, description = "Authentication required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn check_quota(
    user: AuthenticatedUser,
    State(service): State<Arc<QuotaService>>,
    AppQuery(query): AppQuery<QuotaQueryDto>,
) -> Result<Json<ApiResponse<QuotaCheckDto>>, AppError> {
    query
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let check = service.check(user.owner_id(), query.size).await?;

    Ok(Json(ApiResponse::success(Some(check), None, None)))
}

/// Advisory pre-flight check for several files enqueued together
#[utoipa::path(
    post,
    path = "/api/quota/batch",
    tag = "quota",
    request_body = BatchQuotaCheckDto,
    responses(
        (status = 200, description = "Quota figures for the combined size", body = ApiResponse<QuotaCheckDto>),
        (status = 400, description = "Invalid sizes"),
        (status = 401, description = "Authentication required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn check_quota_batch(
    user: AuthenticatedUser,
    State(service): State<Arc<QuotaService>>,
    AppJson(dto): AppJson<BatchQuotaCheckDto>,
) -> Result<Json<ApiResponse<QuotaCheckDto>>, AppError> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let check = service.check_batch(user.owner_id(), &dto.sizes).await?;

    Ok(Json(ApiResponse::success(Some(check), None, None)))
}
