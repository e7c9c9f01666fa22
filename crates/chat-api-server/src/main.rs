use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use chat_api_server::config::Settings;
use chat_api_server::router::build_router;
use chat_api_server::state::AppState;
use chat_api_server::utils::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry();

    info!("Starting chat API server...");

    let settings = Settings::load()?;
    info!("Configuration loaded: llm={:?}, identity={:?}", settings.llm, settings.identity);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    let cleanup_interval = Duration::from_secs(settings.conversation.cleanup_interval_secs.max(1));

    let state = AppState::build(settings)?;

    // Idle session sweep
    let store = state.conversation_manager.store().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                info!("Expired {} idle sessions", removed);
            } else {
                debug!("Session sweep: nothing to expire");
            }
        }
    });

    let app = build_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
