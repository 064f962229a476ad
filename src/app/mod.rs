//! Application layer - listener, routes, and per-session engine.

pub mod protocol;
pub mod routes;
pub mod session;
mod state;

pub use state::{AppState, OauthStates};

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::config::Config;
use crate::error::Result;

/// Build the full gateway router: the WebSocket endpoint at `/` plus the
/// HTTP surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(session::ws_handler))
        .route("/health", get(routes::health))
        .route("/backtest", post(routes::backtest))
        .route("/provider/auth", get(routes::provider_auth))
        .route("/provider/callback", get(routes::provider_callback))
        .with_state(state)
}

/// Gateway entry point.
pub struct App;

impl App {
    /// Bind the configured address and serve sessions until the process is
    /// stopped.
    pub async fn serve(config: Config) -> Result<()> {
        let state = AppState::new(config)?;
        let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, provider = %state.config.active_provider, "Gateway listening");
        axum::serve(listener, router(state)).await?;
        Ok(())
    }
}
