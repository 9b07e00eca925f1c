use crate::assist::{health_handler, ice_handler};
use crate::config::RelayConfig;
use crate::hub::RelayHub;
use crate::signaling::ws_handler;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub hub: RelayHub,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            hub: RelayHub::new(),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/{peer_id}", get(ws_handler))
        .route("/ice", get(ice_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}
