use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use styleduel::render::RendererConfig;
use styleduel::state::AppState;
use styleduel::types::GameConfig;
use styleduel::{sweep, ws};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "styleduel=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting StyleDuel...");

    let config = GameConfig::from_env();

    // Initialize the style renderer
    let renderer = match RendererConfig::from_env().build() {
        Ok(Some(renderer)) => {
            tracing::info!("Style renderer initialized successfully");
            Some(renderer)
        }
        Ok(None) => {
            tracing::info!("No renderer configured. Designs will reveal without images.");
            None
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize style renderer: {}. Designs will reveal without images.",
                e
            );
            None
        }
    };

    let state = Arc::new(AppState::new(config, renderer));

    // Background tasks: TTL hard-stop for sessions, grace eviction for the queue
    sweep::spawn_expiry_sweeper(state.clone());
    sweep::spawn_queue_sweeper(state.clone());

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .fallback_service(ServeDir::new("static"))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // 8368 is ascii for "SD"
    let addr = SocketAddr::from(([0, 0, 0, 0], 8368));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
