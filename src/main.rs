use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uidriver::api::{create_router, AppState};
use uidriver::config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let runtime = RuntimeConfig::from_env();

    let addr: SocketAddr = format!("{}:{}", runtime.host, runtime.port).parse()?;

    // The registry lives here; handlers borrow it through the state
    let state = Arc::new(AppState::new(runtime));
    let app = create_router(Arc::clone(&state));

    tracing::info!("uidriver diagnostics starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let closed = state.shutdown().await;
    tracing::info!("Shut down, {} driver(s) closed", closed);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
