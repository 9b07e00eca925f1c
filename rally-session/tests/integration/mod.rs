pub mod session_tests;

use rally_session::signaling::RelayConnector;
use rally_session::{
    MemoryCredentialStore, SessionConfig, SessionController, SessionHandle, SessionServices,
    SessionSnapshot, StaticIceServers,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use crate::utils::{MemoryNetwork, MemoryRelay, TestGameBridge};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        watchdog_timeout: Duration::from_secs(2),
        send_interval: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

pub struct TestPeer {
    pub handle: SessionHandle,
    pub bridge: TestGameBridge,
    pub credentials: Arc<MemoryCredentialStore>,
}

pub fn spawn_peer_with(
    relay: Arc<dyn RelayConnector>,
    network: &MemoryNetwork,
    credentials: Arc<MemoryCredentialStore>,
) -> TestPeer {
    spawn_configured(relay, network, credentials, test_config())
}

pub fn spawn_configured(
    relay: Arc<dyn RelayConnector>,
    network: &MemoryNetwork,
    credentials: Arc<MemoryCredentialStore>,
    config: SessionConfig,
) -> TestPeer {
    let bridge = TestGameBridge::new();
    let services = SessionServices {
        relay,
        transports: network.factory(),
        ice: Arc::new(StaticIceServers::default()),
        credentials: credentials.clone(),
    };
    let handle = SessionController::spawn(config, services, Arc::new(bridge.clone()));
    TestPeer {
        handle,
        bridge,
        credentials,
    }
}

pub fn spawn_peer(relay: &MemoryRelay, network: &MemoryNetwork) -> TestPeer {
    spawn_peer_with(Arc::new(relay.clone()), network, Arc::default())
}

/// Waits (bounded) for the peer's snapshot to satisfy `predicate`.
pub async fn wait_until(
    peer: &TestPeer,
    what: &str,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    match tokio::time::timeout(Duration::from_secs(5), peer.handle.wait_for(predicate)).await {
        Ok(result) => result.expect("session loop stopped"),
        Err(_) => panic!(
            "Timeout waiting for {what}; last snapshot {:?}",
            peer.handle.snapshot()
        ),
    }
}
