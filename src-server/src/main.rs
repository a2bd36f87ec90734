// dashbridge server
// WebSocket bridge between the dashboard extension UI and LLM providers
//
// Run with: cargo run --bin dashbridge
// Configuration: DASHBRIDGE_* environment variables, `.env`, or a TOML file
// named by DASHBRIDGE_CONFIG.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use dashbridge_lib::{Bridge, BridgeConfig, ChatSettings, Dispatcher};
use dashbridge_server::{serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BridgeConfig::load().context("Failed to load configuration")?;

    let bridge = Arc::new(Bridge::new(config.auth_token.clone(), config.request_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(bridge, ChatSettings::from_config(&config)));

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    log::info!(
        "[server] Request timeout {}ms, max tool rounds {}",
        config.request_timeout_ms,
        config.max_tool_rounds
    );

    serve(listener, AppState::new(dispatcher), shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("[server] Shutdown signal received"),
        Err(e) => {
            log::error!("[server] Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
