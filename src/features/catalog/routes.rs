use axum::{routing::get, Router};
use std::sync::Arc;

use crate::features::catalog::handlers::get_changes;
use crate::features::catalog::services::CatalogStore;

/// Create routes for the catalog feature
pub fn routes(catalog: Arc<dyn CatalogStore>) -> Router {
    Router::new()
        .route("/api/catalog/changes", get(get_changes))
        .with_state(catalog)
}
