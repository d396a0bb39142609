use anyhow::Context;
use axum::{Extension, Router};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;
use utoipa_swagger_ui::SwaggerUi;

use crewsync::api;
use crewsync::config::Config;
use crewsync::db::queries::assignment::AssignmentDoc;
use crewsync::db::queries::audit::{create_staff_name_cache, AuditDoc};
use crewsync::engine::feed::{spawn_change_feed_pump, ChangeFeedHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    Config::init();
    let config = Config::get();

    std::fs::create_dir_all("logs").context("failed to create logs directory")?;

    let file_appender = tracing_appender::rolling::daily("logs", "crewsync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .with_writer(non_blocking)
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .idle_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;

    let merged_doc = AssignmentDoc::openapi().merge_from(AuditDoc::openapi());

    let name_cache = create_staff_name_cache();
    let feed_hub = Arc::new(ChangeFeedHub::new());
    let feed_pump = spawn_change_feed_pump(
        pool.clone(),
        config.change_feed_channel.clone(),
        feed_hub.clone(),
    );

    let app = Router::new()
        .merge(api::health::health_routes())
        .merge(api::assignment::assignment_routes())
        .merge(api::audit::audit_routes())
        .merge(api::session::session_routes())
        .merge(
            SwaggerUi::new("/swagger")
                .url("/api-docs/openapi.json", merged_doc.clone())
        )
        .merge(
            RapiDoc::with_openapi("/api-docs/rapidoc.json", merged_doc)
                .path("/rapidoc")
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(Extension(name_cache.clone()))
        .layer(Extension(feed_hub.clone()))
        .with_state(pool.clone());

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    let server_task = tokio::spawn(run_server(
        app,
        config.bind_addr,
        shutdown_tx.clone(),
        pool.clone(),
    ));

    tokio::select! {
        _ = server_task => println!("Server task finished."),
        _ = shutdown_signal(shutdown_tx.subscribe(), pool.clone()) => (),
    }
    feed_pump.abort();
    println!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal(mut shutdown_rx: broadcast::Receiver<()>, pool: PgPool) {
    tokio::select! {
        _ = signal::ctrl_c() => println!("Received Ctrl+C, shutting down..."),
        _ = shutdown_rx.recv() => println!("Received shutdown signal."),
    }
    println!("🛠️ Closing database pool...");
    pool.close().await;
    println!("✅ Database pool closed. Server shutting down.");
}

async fn run_server(
    app: Router,
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    pool: PgPool,
) {
    println!("Server running at http://{}", addr);

    let listener = TcpListener::bind(&addr).await.expect("Failed to bind listener");

    let shutdown_signal = shutdown_signal(shutdown_tx.subscribe(), pool.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .expect("Server encountered an error");
}
