use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::features::uploads::handlers::{
    abort_upload, complete_upload, get_upload_status, sweep_sessions, upload_chunk, UploadState,
};

/// Multipart framing and metadata fields on top of the chunk bytes
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create routes for the uploads feature
pub fn routes(state: UploadState) -> Router {
    let chunk_limit = state.receiver.max_chunk_bytes() + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route(
            "/api/uploads/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/api/uploads/complete", post(complete_upload))
        .route(
            "/api/uploads/{upload_id}",
            get(get_upload_status).delete(abort_upload),
        )
        .route("/api/admin/uploads/sweep", post(sweep_sessions))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::UploadConfig;
    use crate::features::auth::model::AuthenticatedUser;
    use crate::features::catalog::dtos::CatalogEntryDto;
    use crate::features::catalog::models::NewCatalogEntry;
    use crate::features::catalog::services::{CatalogStore, MemoryCatalogStore};
    use crate::features::quota::dtos::QuotaExceededDto;
    use crate::features::quota::QuotaService;
    use crate::features::uploads::dtos::{
        AbortUploadResponseDto, ChunkAckDto, SweepResultDto, UploadSessionStatusDto,
    };
    use crate::features::uploads::{Assembler, ChunkReceiver, SessionStore, SessionSweeper};
    use crate::modules::storage::LocalStorage;
    use crate::shared::constants::KIND_FILE;
    use crate::shared::test_helpers::{create_admin_user, create_test_user, with_user};
    use crate::shared::types::ApiResponse;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestApp {
        _dir: TempDir,
        storage: Arc<LocalStorage>,
        sessions: Arc<SessionStore>,
        catalog: Arc<MemoryCatalogStore>,
        state: UploadState,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(LocalStorage::new(dir.path()));
            let sessions = Arc::new(SessionStore::new(storage.clone()));
            let catalog = Arc::new(MemoryCatalogStore::new());
            let quota = Arc::new(QuotaService::new(catalog.clone(), 10 * 1024 * 1024 * 1024));
            let config = UploadConfig::default();

            let state = UploadState {
                receiver: Arc::new(ChunkReceiver::new(sessions.clone(), config.clone())),
                assembler: Arc::new(Assembler::new(
                    sessions.clone(),
                    quota,
                    catalog.clone(),
                    config.clone(),
                )),
                sessions: sessions.clone(),
                sweeper: Arc::new(SessionSweeper::new(
                    sessions.clone(),
                    Duration::ZERO,
                    config.sweep_interval,
                )),
            };

            Self {
                _dir: dir,
                storage,
                sessions,
                catalog,
                state,
            }
        }

        fn server(&self, user: AuthenticatedUser) -> TestServer {
            TestServer::new(with_user(routes(self.state.clone()), user)).unwrap()
        }
    }

    fn chunk_form(upload_id: &str, index: u32, total: u32, data: Vec<u8>) -> MultipartForm {
        MultipartForm::new()
            .add_text("upload_id", upload_id)
            .add_text("chunk_index", index.to_string())
            .add_text("total_chunks", total.to_string())
            .add_text("file_name", "movie.mkv")
            .add_part("chunk", Part::bytes(data).file_name("blob"))
    }

    #[tokio::test]
    async fn test_happy_path_three_chunks() {
        let app = TestApp::new();
        let server = app.server(create_test_user("alice"));

        let chunk_size = 10 * 1024 * 1024;
        let file_size = 25 * 1024 * 1024;
        let file: Vec<u8> = (0..file_size).map(|i| (i % 251) as u8).collect();

        let chunks: Vec<&[u8]> = file.chunks(chunk_size).collect();
        assert_eq!(chunks.len(), 3);

        for (index, chunk) in chunks.iter().enumerate() {
            let response = server
                .post("/api/uploads/chunk")
                .multipart(chunk_form("session-0001", index as u32, 3, chunk.to_vec()))
                .await;
            response.assert_status_ok();
            let ack: ApiResponse<ChunkAckDto> = response.json();
            assert_eq!(ack.data.unwrap().received_bytes, chunk.len() as u64);
        }

        let response = server
            .post("/api/uploads/complete")
            .json(&json!({
                "upload_id": "session-0001",
                "file_name": "movie.mkv",
                "parent_id": null,
                "total_chunks": 3,
                "content_type": "video/x-matroska",
                "file_size": file_size
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: ApiResponse<CatalogEntryDto> = response.json();
        let entry = body.data.unwrap();
        assert_eq!(entry.size, 26_214_400);
        assert_eq!(entry.name, "movie.mkv");
        assert_eq!(entry.content_type, "video/x-matroska");
        assert!(entry.parent_id.is_none());

        let rows = app.catalog.entries("alice").await;
        let stored = app
            .storage
            .read(rows[0].storage_path.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(stored == file);
        assert!(app.sessions.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejection_returns_507_and_purges() {
        let app = TestApp::new();
        app.catalog.set_limit("alice", 1_000_000).await;
        app.catalog
            .insert_entry(NewCatalogEntry {
                owner_id: "alice".to_string(),
                parent_id: None,
                name: "existing.bin".to_string(),
                kind: KIND_FILE.to_string(),
                size_bytes: 900_000,
                content_type: None,
                storage_path: None,
            })
            .await
            .unwrap();
        let server = app.server(create_test_user("alice"));

        server
            .post("/api/uploads/chunk")
            .multipart(chunk_form("session-0001", 0, 1, vec![0u8; 200_000]))
            .await
            .assert_status_ok();

        let response = server
            .post("/api/uploads/complete")
            .json(&json!({
                "upload_id": "session-0001",
                "file_name": "movie.mkv",
                "total_chunks": 1,
                "file_size": 200_000
            }))
            .await;

        response.assert_status(StatusCode::INSUFFICIENT_STORAGE);
        let body: ApiResponse<QuotaExceededDto> = response.json();
        assert!(!body.success);
        let details = body.data.unwrap();
        assert_eq!(details.available, 100_000);
        assert_eq!(details.used, 900_000);
        assert_eq!(details.limit, 1_000_000);
        assert_eq!(details.requested, 200_000);

        assert_eq!(app.catalog.entries("alice").await.len(), 1);
        assert!(app
            .sessions
            .received_chunks("session-0001")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_is_conflict() {
        let app = TestApp::new();
        let server = app.server(create_test_user("alice"));

        for index in [0u32, 1, 3, 4] {
            server
                .post("/api/uploads/chunk")
                .multipart(chunk_form("session-0001", index, 5, vec![9u8; 16]))
                .await
                .assert_status_ok();
        }

        let response = server
            .post("/api/uploads/complete")
            .json(&json!({
                "upload_id": "session-0001",
                "file_name": "movie.mkv",
                "total_chunks": 5,
                "file_size": 80
            }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        assert!(app.catalog.entries("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_client_errors() {
        let app = TestApp::new();
        let server = app.server(create_test_user("alice"));

        let no_chunk = MultipartForm::new()
            .add_text("upload_id", "session-0001")
            .add_text("chunk_index", "0")
            .add_text("total_chunks", "1")
            .add_text("file_name", "a.txt");
        server
            .post("/api/uploads/chunk")
            .multipart(no_chunk)
            .await
            .assert_status_bad_request();

        // Chunk first, upload_id missing
        let no_id = MultipartForm::new()
            .add_part("chunk", Part::bytes(b"abc".to_vec()))
            .add_text("chunk_index", "0")
            .add_text("total_chunks", "1")
            .add_text("file_name", "a.txt");
        server
            .post("/api/uploads/chunk")
            .multipart(no_id)
            .await
            .assert_status_bad_request();

        server
            .post("/api/uploads/complete")
            .json(&json!({ "upload_id": "session-0001" }))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_chunk_before_metadata_is_buffered() {
        let app = TestApp::new();
        let server = app.server(create_test_user("alice"));

        let form = MultipartForm::new()
            .add_part("chunk", Part::bytes(b"early".to_vec()))
            .add_text("upload_id", "session-0001")
            .add_text("chunk_index", "0")
            .add_text("total_chunks", "2")
            .add_text("file_name", "a.txt");
        server
            .post("/api/uploads/chunk")
            .multipart(form)
            .await
            .assert_status_ok();

        assert_eq!(
            app.sessions.received_chunks("session-0001").await.unwrap(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_status_and_abort() {
        let app = TestApp::new();
        let alice = app.server(create_test_user("alice"));
        let bob = app.server(create_test_user("bob"));

        alice
            .post("/api/uploads/chunk")
            .multipart(chunk_form("session-0001", 1, 3, b"xyz".to_vec()))
            .await
            .assert_status_ok();

        let response = alice.get("/api/uploads/session-0001").await;
        response.assert_status_ok();
        let body: ApiResponse<UploadSessionStatusDto> = response.json();
        let status = body.data.unwrap();
        assert_eq!(status.total_chunks, 3);
        assert_eq!(status.received_chunks, vec![1]);

        bob.get("/api/uploads/session-0001")
            .await
            .assert_status(StatusCode::FORBIDDEN);
        bob.delete("/api/uploads/session-0001")
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = alice.delete("/api/uploads/session-0001").await;
        response.assert_status_ok();
        let body: ApiResponse<AbortUploadResponseDto> = response.json();
        assert!(body.data.unwrap().purged);

        alice
            .get("/api/uploads/session-0001")
            .await
            .assert_status_not_found();
        let body: ApiResponse<AbortUploadResponseDto> =
            alice.delete("/api/uploads/session-0001").await.json();
        assert!(!body.data.unwrap().purged);
    }

    #[tokio::test]
    async fn test_sweep_requires_admin() {
        let app = TestApp::new();
        let user = app.server(create_test_user("alice"));
        user.post("/api/uploads/chunk")
            .multipart(chunk_form("session-0001", 0, 2, b"a".to_vec()))
            .await
            .assert_status_ok();

        user.post("/api/admin/uploads/sweep")
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let admin = app.server(create_admin_user("root"));
        let response = admin.post("/api/admin/uploads/sweep").await;
        response.assert_status_ok();
        let body: ApiResponse<SweepResultDto> = response.json();
        assert_eq!(body.data.unwrap().purged, vec!["session-0001"]);
    }
}
