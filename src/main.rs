mod api;
mod broadcast;
mod config;
mod error;
mod persist;
mod protocol;
mod registry;
mod scoring;
mod session;
mod state;
mod supervisor;
mod types;
mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::EngineConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizdeck=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = dotenvy::dotenv();
    let config = EngineConfig::from_env();
    let port = config.port;
    tracing::info!("Starting quizdeck session engine...");

    let state = Arc::new(AppState::new(config));
    state.spawn_presence_sweeper();

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/code/{code}", get(api::session_by_code))
        .route(
            "/api/sessions/code/{code}/archive",
            post(api::archive_session),
        )
        .route(
            "/api/sessions/rejoin-token/{token}",
            get(api::redeem_rejoin_token),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
