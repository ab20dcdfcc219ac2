use anyhow::anyhow;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use accord_chat::config::Config;
use accord_chat::{ws, AppState};

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let state = AppState::new(config);

    let shutdown = CancellationToken::new();
    let stream_server = tokio::spawn(ws::websocket_server(
        state.clone(),
        state.config.stream_addr,
        shutdown.clone(),
    ));

    info!("Starting Rocket server...");
    let launched = accord_chat::rocket(state).launch().await;

    shutdown.cancel();
    match stream_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("WebSocket server failed: {}", e),
        Err(e) => warn!("WebSocket server task panicked: {}", e),
    }

    launched.map_err(|e| anyhow!("rocket failed: {e}"))?;
    Ok(())
}
