//! SketchSync WebSocket Relay Server
//!
//! Relays scene snapshots, cursors, chat and typing indicators between clients
//! in the same room. Only the latest scene of each room is kept, in memory.
//!
//! ## Protocol
//!
//! JSON text frames tagged by event name:
//! ```json
//! { "type": "join-room", "roomId": "r1", "user": { "id": "u1", "name": "Ada" } }
//! { "type": "drawing-update", "roomId": "r1", "elements": [], "appState": {}, "timestamp": 1700000000000 }
//! { "type": "pointer-update", "roomId": "r1", "pointer": { "x": 100, "y": 200 }, "user": { ... } }
//! ```

mod rooms;
mod socket;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use rooms::RoomRegistry;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Environment variable holding the listen address.
const ADDR_ENV: &str = "SKETCHSYNC_ADDR";
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchsync_server=info,tower_http=info".into()),
        )
        .init();

    let registry = Arc::new(RoomRegistry::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(registry);

    let addr: SocketAddr = std::env::var(ADDR_ENV)
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    info!("SketchSync relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://localhost:{}/ws", addr.port());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Index page
async fn index() -> &'static str {
    "SketchSync Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<RoomRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle_socket(socket, registry))
}
