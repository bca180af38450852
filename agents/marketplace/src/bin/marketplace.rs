//! ArkPunks marketplace binary.

use marketplace::{create_router, AppState, Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ArkPunks marketplace");

    let settings = Settings::load()?;
    info!(
        network = %settings.network,
        ark_server = %settings.ark_server_url,
        "Configuration loaded"
    );

    let bind_address = settings.bind_address.clone();
    let state = Arc::new(AppState::new(settings)?);
    let app = create_router(state);

    info!(address = %bind_address, "Listening");
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
