use axum::{middleware::from_fn, Router};
use cloudvault_core::core::config::Config;
use cloudvault_core::core::openapi::{ApiDoc, SwaggerInfoModifier};
use cloudvault_core::core::{database, middleware};
use cloudvault_core::features::auth::JwtValidator;
use cloudvault_core::features::catalog::{
    routes as catalog_routes, CatalogStore, MemoryCatalogStore, PgCatalogStore,
};
use cloudvault_core::features::quota::{routes as quota_routes, QuotaService};
use cloudvault_core::features::uploads::{
    routes as uploads_routes, Assembler, ChunkReceiver, SessionStore, SessionSweeper, UploadState,
};
use cloudvault_core::modules::storage::LocalStorage;
use std::sync::Arc;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn main() -> anyhow::Result<()> {
    // Build Tokio runtime with configurable worker threads
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(worker_threads * 4)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(worker_threads))
}

async fn async_main(worker_threads: usize) -> anyhow::Result<()> {
    // Load .env file BEFORE initializing logger so RUST_LOG is available
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    let available_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    tracing::info!(
        "System info: available_cpus={}, tokio_worker_threads={}, pid={}",
        available_cpus,
        worker_threads,
        std::process::id()
    );

    tracing::info!("Configuration loaded successfully");

    // Catalog: Postgres when configured, in memory otherwise
    let catalog: Arc<dyn CatalogStore> = match &config.database {
        Some(db_config) => {
            let pool = database::create_pool(db_config).await?;
            tracing::info!("Database connection pool created");

            tracing::info!("Running database migrations...");
            database::run_migrations(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
            tracing::info!("Database migrations completed successfully");

            Arc::new(PgCatalogStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory catalog (not persisted)");
            Arc::new(MemoryCatalogStore::new())
        }
    };

    // Initialize auth
    let jwt_validator = Arc::new(JwtValidator::new(&config.auth));
    tracing::info!("Auth configuration initialized");

    // Initialize local storage
    let storage = Arc::new(LocalStorage::new(config.storage.root.clone()));
    storage
        .init()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage root: {}", e))?;
    tracing::info!("Storage root: {}", storage.root().display());

    // Initialize upload services
    let quota_service = Arc::new(QuotaService::new(
        Arc::clone(&catalog),
        config.quota.default_limit_bytes,
    ));
    let sessions = Arc::new(SessionStore::new(Arc::clone(&storage)));
    let receiver = Arc::new(ChunkReceiver::new(
        Arc::clone(&sessions),
        config.upload.clone(),
    ));
    let assembler = Arc::new(Assembler::new(
        Arc::clone(&sessions),
        Arc::clone(&quota_service),
        Arc::clone(&catalog),
        config.upload.clone(),
    ));
    let sweeper = Arc::new(SessionSweeper::new(
        Arc::clone(&sessions),
        config.upload.session_ttl,
        config.upload.sweep_interval,
    ));
    tracing::info!(
        "Upload services initialized (max chunk {} bytes, max {} chunks)",
        config.upload.max_chunk_bytes,
        config.upload.max_chunks
    );

    // Spawn stale session sweeper worker
    let sweeper_worker = Arc::clone(&sweeper);
    tokio::spawn(async move {
        sweeper_worker.run().await;
    });
    tracing::info!("Session sweeper worker spawned");

    let upload_state = UploadState {
        receiver,
        assembler,
        sessions,
        sweeper,
    };

    // Build application router with dynamic swagger config
    let swagger_modifier = SwaggerInfoModifier {
        title: config.swagger.title.clone(),
        version: config.swagger.version.clone(),
        description: config.swagger.description.clone(),
    };

    let mut openapi = ApiDoc::openapi();
    swagger_modifier.modify(&mut openapi);

    // Build swagger router
    let swagger = if let Some(credentials) = config.swagger.credentials() {
        tracing::info!("Swagger UI basic auth enabled");
        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
            .layer(from_fn(middleware::basic_auth_middleware(Arc::new(
                credentials,
            ))))
    } else {
        tracing::info!("Swagger UI basic auth disabled (no credentials configured)");
        Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
    };

    // Protected routes (require JWT authentication)
    let protected_routes = Router::new()
        .merge(uploads_routes(upload_state))
        .merge(quota_routes(quota_service))
        .merge(catalog_routes(catalog))
        .route_layer(axum::middleware::from_fn_with_state(
            jwt_validator.clone(),
            middleware::auth_middleware,
        ));

    // Simple health check endpoint (no auth required)
    async fn health_check() -> axum::http::StatusCode {
        axum::http::StatusCode::OK
    }
    let health_route = Router::new().route("/health", axum::routing::get(health_check));

    let app = Router::new()
        .merge(swagger)
        .merge(protected_routes)
        .merge(health_route)
        .layer(middleware::cors_layer(
            config.app.cors_allowed_origins.clone(),
        ))
        // Propagate X-Request-Id to response headers
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(middleware::MakeSpanWithRequestId)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Generate X-Request-Id using UUID v7 (or use client-provided one)
        .layer(SetRequestIdLayer::x_request_id(middleware::MakeRequestUuid));

    // Start server
    let addr = config.app.server_address();
    let socket_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    // Use socket2 for TCP listener configuration
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(socket_addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;

    // Chunk bodies are large; favour throughput
    socket.set_recv_buffer_size(1024 * 1024)?;
    socket.set_send_buffer_size(256 * 1024)?;

    let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(60));
    socket.set_tcp_keepalive(&keepalive)?;

    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(1024)?;

    let listener = tokio::net::TcpListener::from_std(socket.into())?;
    tracing::info!("Server listening on {}", format!("http://{}", addr));
    tracing::info!(
        "Swagger UI available at {}",
        format!("http://{}/swagger-ui/", addr)
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
