use axum::{extract::State, Json};
use std::sync::Arc;

use crate::core::error::AppError;
use crate::features::auth::model::AuthenticatedUser;
use crate::features::catalog::dtos::CatalogChangesDto;
use crate::features::catalog::services::CatalogStore;
use crate::shared::types::ApiResponse;

/// Last-known-change timestamp of the caller's catalog
///
/// Clients poll this and refresh their view when the value advances.
#[utoipa::path(
    get,
    path = "/api/catalog/changes",
    tag = "catalog",
    responses(
        (status = 200, description = "Change marker", body = ApiResponse<CatalogChangesDto>),
        (status = 401, description = "Authentication required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_changes(
    user: AuthenticatedUser,
    State(catalog): State<Arc<dyn CatalogStore>>,
) -> Result<Json<ApiResponse<CatalogChangesDto>>, AppError> {
    let last_change = catalog.last_change(user.owner_id()).await?;

    Ok(Json(ApiResponse::success(
        Some(CatalogChangesDto { last_change }),
        None,
        None,
    )))
}
