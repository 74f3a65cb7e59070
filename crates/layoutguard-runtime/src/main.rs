//! layoutguard collaboration relay.
//!
//! - WebSocket endpoint: /v1/collab?doc=...&ticket=...
//! - One authoritative replica per document, held in memory
//! - Heartbeat ping + idle timeout
//!
//! Config path: first argument, else `LAYOUTGUARD_CONFIG`, else
//! `layoutguard.yaml`.

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_runtime::{app_state, config, router};

const DEFAULT_CONFIG: &str = "layoutguard.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LAYOUTGUARD_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .server
        .listen
        .parse()
        .map_err(|e| LayoutError::BadRequest(format!("server.listen must be a valid SocketAddr: {e}")))?;

    let state = app_state::AppState::new(cfg)?;
    let app = router::build_router(state);

    tracing::info!(%listen, config = %path, "layoutguard-relay starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| LayoutError::Internal(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| LayoutError::Internal(format!("server failed: {e}")))
}
