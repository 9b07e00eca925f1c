
use rally_relay::{AppState, RelayConfig, RelayHub, router};
use std::net::SocketAddr;
use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Serves the relay on an ephemeral port and returns its address and hub.
pub async fn spawn_relay() -> (SocketAddr, RelayHub) {
    let state = AppState::new(RelayConfig::default());
    let hub = state.hub.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay listener");
    let addr = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("relay server crashed");
    });

    (addr, hub)
}
