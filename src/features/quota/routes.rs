use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::features::quota::handlers::{check_quota, check_quota_batch};
use crate::features::quota::services::QuotaService;

/// Create routes for the quota feature
pub fn routes(service: Arc<QuotaService>) -> Router {
    Router::new()
        .route("/api/quota", get(check_quota))
        .route("/api/quota/batch", post(check_quota_batch))
        .with_state(service)
}
