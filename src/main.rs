use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use theater_assistant::{config::Config, controllers, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Theater Assistant API");

    let port = config.app.port;
    let app_state = AppState::new(config).await?;
    info!("Database connected, migrations applied");

    // Create the main router
    let app = Router::new()
        .route("/", get(|| async { "Theater Assistant API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // JSON API под /api, WebSocket отдельно
        .nest("/api", controllers::routes(app_state.clone()))
        .merge(controllers::ws::routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
