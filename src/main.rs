mod cli;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod storage;
#[cfg(test)]
mod test_support;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::Database;
use crate::services::Services;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: Services,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output on stdout stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    if let Command::IssueToken {
        subject,
        role,
        hours,
    } = &command
    {
        return cli::issue_token(&config, subject, role, *hours);
    }

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let blobs = storage::open_blob_store(&config.storage, &db);
    let services = Services::new(db, blobs, config.limits.clone());

    match command {
        Command::Serve => serve(config, services).await,
        other => cli::run(other, &config, &services).await,
    }
}

async fn serve(config: Arc<Config>, services: Services) -> anyhow::Result<()> {
    tracing::info!("Starting Folio...");

    let state = AppState {
        config: config.clone(),
        services,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected_routes = Router::new()
        // Manuscripts
        .route("/files", get(handlers::file::list_files))
        .route("/files/upload", post(handlers::file::upload_file))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        .route(
            "/files/:id/outputs/:index/download",
            get(handlers::file::download_output),
        )
        .route("/storage/status", get(handlers::storage::storage_status))
        // Conversion worker
        .route("/worker/files/:id/input", get(handlers::worker::get_input))
        .route(
            "/worker/files/:id/start",
            post(handlers::worker::start_conversion),
        )
        .route(
            "/worker/files/:id/complete",
            post(handlers::worker::complete_conversion),
        )
        .route(
            "/worker/files/:id/fail",
            post(handlers::worker::fail_conversion),
        )
        // Admin storage management
        .route("/admin/storage/stats", get(handlers::admin::storage_stats))
        .route("/admin/storage/report", get(handlers::admin::storage_report))
        .route(
            "/admin/storage/cleanup-candidates",
            get(handlers::admin::cleanup_candidates),
        )
        .route(
            "/admin/storage/oldest-files",
            get(handlers::admin::oldest_files),
        )
        .route("/admin/storage/cleanup", post(handlers::admin::run_cleanup))
        .route(
            "/admin/storage/cleanup-orphaned",
            post(handlers::admin::cleanup_orphaned),
        )
        .route("/admin/storage/files", delete(handlers::admin::delete_files))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", protected_routes)
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
