use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::features::auth;
use crate::features::catalog::{dtos as catalog_dtos, handlers as catalog_handlers};
use crate::features::quota::{dtos as quota_dtos, handlers as quota_handlers};
use crate::features::uploads::{dtos as uploads_dtos, handlers as uploads_handlers};
use crate::shared::types::{ApiResponse, Meta};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Uploads
        uploads_handlers::upload_chunk,
        uploads_handlers::complete_upload,
        uploads_handlers::get_upload_status,
        uploads_handlers::abort_upload,
        // Quota
        quota_handlers::check_quota,
        quota_handlers::check_quota_batch,
        // Catalog
        catalog_handlers::get_changes,
        // Admin
        uploads_handlers::sweep_sessions,
    ),
    components(
        schemas(
            // Shared
            Meta,
            auth::model::AuthenticatedUser,
            // Uploads
            uploads_dtos::UploadChunkDto,
            uploads_dtos::ChunkAckDto,
            uploads_dtos::CompleteUploadDto,
            uploads_dtos::UploadSessionStatusDto,
            uploads_dtos::AbortUploadResponseDto,
            uploads_dtos::SweepResultDto,
            ApiResponse<uploads_dtos::ChunkAckDto>,
            ApiResponse<uploads_dtos::UploadSessionStatusDto>,
            ApiResponse<uploads_dtos::AbortUploadResponseDto>,
            ApiResponse<uploads_dtos::SweepResultDto>,
            // Quota
            quota_dtos::BatchQuotaCheckDto,
            quota_dtos::QuotaCheckDto,
            quota_dtos::QuotaExceededDto,
            ApiResponse<quota_dtos::QuotaCheckDto>,
            ApiResponse<quota_dtos::QuotaExceededDto>,
            // Catalog
            catalog_dtos::CatalogEntryDto,
            catalog_dtos::CatalogChangesDto,
            ApiResponse<catalog_dtos::CatalogEntryDto>,
            ApiResponse<catalog_dtos::CatalogChangesDto>,
        )
    ),
    tags(
        (name = "uploads", description = "Resumable chunked uploads"),
        (name = "quota", description = "Advisory storage quota checks"),
        (name = "catalog", description = "Catalog change polling"),
        (name = "admin", description = "Administrative maintenance (admin role only)"),
    ),
    modifiers(&SecurityAddon),
    info(
        title = "CloudVault API",
        version = "0.1.0",
        description = "API documentation for CloudVault",
    )
)]
pub struct ApiDoc;

/// Adds Bearer JWT security scheme to OpenAPI spec
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Modifier to override OpenAPI info from config
pub struct SwaggerInfoModifier {
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Modify for SwaggerInfoModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = self.title.clone();
        openapi.info.version = self.version.clone();
        openapi.info.description = Some(self.description.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_upload_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/uploads/chunk",
            "/api/uploads/complete",
            "/api/uploads/{upload_id}",
            "/api/quota",
            "/api/quota/batch",
            "/api/catalog/changes",
            "/api/admin/uploads/sweep",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
