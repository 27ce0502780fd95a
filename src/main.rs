// main.rs
// Loads configuration, connects to MongoDB and serves the router from `build_app`.

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use salesdesk::{build_app, config::AppConfig, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,salesdesk=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr;
    let state = Arc::new(
        state::init_state_with(config)
            .await
            .context("failed to initialize MongoDB state")?,
    );

    let app = build_app(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
