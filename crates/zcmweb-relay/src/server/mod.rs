//! HTTP surface: the WebSocket endpoint for remote clients and `/health`.

mod health;
mod ws;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::relay::RelayHandle;
use crate::session::SessionRegistry;

pub use health::HealthResponse;
pub use ws::respond;

/// Shared state for every connection.
pub struct AppState {
    pub relay: RelayHandle,
    pub sessions: SessionRegistry,
    /// Frames buffered per connection before deliveries are dropped.
    pub outbound_capacity: usize,
}

impl AppState {
    pub fn new(relay: RelayHandle, outbound_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            relay,
            sessions: SessionRegistry::new(),
            outbound_capacity: outbound_capacity.max(1),
        })
    }
}

pub fn router(state: Arc<AppState>, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws::upgrade))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then close every session.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    ws_path: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(Arc::clone(&state), ws_path);
    info!(addr = %listener.local_addr()?, ws_path, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    state.sessions.disconnect_all().await;
    Ok(())
}
