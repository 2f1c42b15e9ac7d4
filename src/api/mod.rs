// HTTP and WebSocket surface of the hub

pub mod publish;
pub mod websocket;

pub use publish::{create_publish_router, PublishAppState, PublishError};
pub use websocket::{create_ws_router, ws_handler, WsAppState};

use crate::config::HubConfig;
use crate::hub::Hub;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Complete hub router: WebSocket endpoint plus publish API
pub fn create_hub_router(hub: Arc<Hub>, ws_path: &str) -> Router {
    create_ws_router(Arc::new(WsAppState { hub: Arc::clone(&hub) }), ws_path)
        .merge(create_publish_router(Arc::new(PublishAppState { hub })))
}

/// Serve the hub on an already bound listener until the server stops
pub async fn serve_hub(listener: TcpListener, hub: Arc<Hub>, config: &HubConfig) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(addr = %addr, path = %config.path, "Hub listening");

    axum::serve(listener, create_hub_router(hub, &config.path))
        .await
        .context("Hub server failed")
}
