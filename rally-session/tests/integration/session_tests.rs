use rally_core::{GameMessage, HostCredential, HostRole, RoomCode};
use rally_session::signaling::RelayConnector;
use rally_session::transport::{ChannelState, IceState, TransportEvent};
use rally_session::{CredentialStore, SessionConfig, SessionError, SessionMode, SessionStatus};
use serde_json::{Map, json};
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{
    TestPeer, init_tracing, spawn_configured, spawn_peer, spawn_peer_with, test_config, wait_until,
};
use crate::utils::{CollidingRelay, DeadRelay, MemoryNetwork, MemoryRelay, TEST_TRACK};

fn state_message(t: f64) -> GameMessage {
    let mut car = Map::new();
    car.insert("x".into(), json!(1.5));
    car.insert("y".into(), json!(-2.0));
    GameMessage::State {
        t,
        car,
        extra: Map::new(),
    }
}

async fn connect_pair(relay: &MemoryRelay, network: &MemoryNetwork) -> (TestPeer, TestPeer, RoomCode) {
    connect_pair_with(relay, network, test_config()).await
}

async fn connect_pair_with(
    relay: &MemoryRelay,
    network: &MemoryNetwork,
    config: SessionConfig,
) -> (TestPeer, TestPeer, RoomCode) {
    let connector: Arc<dyn RelayConnector> = Arc::new(relay.clone());
    let host = spawn_configured(connector.clone(), network, Arc::default(), config.clone());
    let guest = spawn_configured(connector, network, Arc::default(), config);

    let code = host.handle.host().await.unwrap();
    guest.handle.join(code.as_str()).await.unwrap();

    wait_until(&host, "host connected", |s| s.status == SessionStatus::Connected).await;
    wait_until(&guest, "guest connected", |s| s.status == SessionStatus::Connected).await;
    (host, guest, code)
}

#[tokio::test]
async fn test_host_and_join_exchange_init_and_ready() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let host = spawn_peer(&relay, &network);
    let guest = spawn_peer(&relay, &network);

    let code = host.handle.host().await.unwrap();
    let snapshot = host.handle.snapshot();
    assert_eq!(snapshot.mode, SessionMode::Host);
    assert_eq!(snapshot.status, SessionStatus::WaitingForPeer);
    assert_eq!(snapshot.room.as_ref(), Some(&code));
    assert!(host.credentials.load(&code).is_some());

    // Codes are case-insensitive on the way in.
    guest
        .handle
        .join(&code.as_str().to_lowercase())
        .await
        .unwrap();
    assert_eq!(guest.handle.snapshot().mode, SessionMode::Client);

    let init = guest
        .bridge
        .wait_for_message(|m| matches!(m, GameMessage::Init { .. }))
        .await
        .expect("guest never got init");
    assert_eq!(
        init,
        GameMessage::Init {
            track_def: TEST_TRACK.to_owned(),
            host_role: HostRole::Driver,
        }
    );

    let ready = host
        .bridge
        .wait_for_message(|m| matches!(m, GameMessage::Ready))
        .await;
    assert!(ready.is_some());
    wait_until(&host, "guest ready", |s| s.peer_ready).await;
    wait_until(&guest, "guest ready", |s| s.peer_ready).await;

    host.handle.send(state_message(0.25)).await.unwrap();
    let state = guest
        .bridge
        .wait_for_message(|m| matches!(m, GameMessage::State { .. }))
        .await;
    assert_eq!(state, Some(state_message(0.25)));

    assert!(network.candidates_received() > 0);
    assert_eq!(host.bridge.opened.lock().await.as_slice(), &[SessionMode::Host]);
    assert_eq!(guest.bridge.opened.lock().await.as_slice(), &[SessionMode::Client]);
}

#[tokio::test]
async fn test_outbound_tick_streams_game_state() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, _code) = connect_pair(&relay, &network).await;

    *guest.bridge.tick_message.lock().await = Some(GameMessage::Driver {
        input: Map::new(),
        bullet_time_held: Some(false),
    });

    for _ in 0..200 {
        let drivers = host
            .bridge
            .received()
            .await
            .iter()
            .filter(|m| matches!(m, GameMessage::Driver { .. }))
            .count();
        if drivers >= 3 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("host did not receive a stream of driver inputs");
}

#[tokio::test]
async fn test_guest_link_drop_mid_negotiation_then_reconnect() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    network.hold();

    let host = spawn_peer(&relay, &network);
    let guest = spawn_peer(&relay, &network);
    let code = host.handle.host().await.unwrap();
    guest.handle.join(code.as_str()).await.unwrap();

    wait_until(&host, "host negotiating", |s| s.status == SessionStatus::Negotiating).await;
    let guest_id = guest
        .handle
        .snapshot()
        .local_peer
        .expect("guest has an identity");

    relay.kill(&guest_id);

    let snapshot = wait_until(&host, "host waiting", |s| {
        s.status == SessionStatus::WaitingForPeer
    })
    .await;
    assert_eq!(snapshot.room.as_ref(), Some(&code));
    assert!(snapshot.remote_peer.is_none());
    wait_until(&guest, "guest reconnectable", |s| {
        matches!(s.status, SessionStatus::Reconnectable { .. })
    })
    .await;
    assert_eq!(guest.handle.snapshot().room.as_ref(), Some(&code));
    assert!(host.bridge.peer_lost_count().await >= 1);

    network.release();
    guest.handle.reconnect_client(code.as_str()).await.unwrap();

    wait_until(&host, "host reconnected", |s| s.status == SessionStatus::Connected).await;
    let snapshot = wait_until(&guest, "guest reconnected", |s| {
        s.status == SessionStatus::Connected
    })
    .await;
    assert_ne!(snapshot.local_peer, Some(guest_id));
    assert!(
        guest
            .bridge
            .wait_for_message(|m| matches!(m, GameMessage::Init { .. }))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn test_ice_failure_restarts_and_recovers() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, _code) = connect_pair(&relay, &network).await;

    network.fail_ice();

    for peer in [&host, &guest] {
        let snapshot = wait_until(peer, "recovery", |s| {
            s.status == SessionStatus::Connected && s.restarts >= 1
        })
        .await;
        assert!(snapshot.restarts <= 2);
    }

    host.handle.send(state_message(3.0)).await.unwrap();
    assert!(
        guest
            .bridge
            .wait_for_message(|m| *m == state_message(3.0))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn test_host_reclaims_room_after_link_loss() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, code) = connect_pair(&relay, &network).await;

    let host_id = host.handle.snapshot().local_peer.unwrap();
    relay.kill(&host_id);
    wait_until(&guest, "guest waiting", |s| s.status == SessionStatus::WaitingForPeer).await;
    wait_until(&host, "host reconnectable", |s| {
        matches!(s.status, SessionStatus::Reconnectable { .. })
    })
    .await;

    let mode = host.handle.reconnect_host(code.as_str()).await.unwrap();
    assert_eq!(mode, SessionMode::Host);

    wait_until(&host, "host reconnected", |s| s.status == SessionStatus::Connected).await;
    wait_until(&guest, "guest reconnected", |s| s.status == SessionStatus::Connected).await;
    for _ in 0..200 {
        let inits = guest
            .bridge
            .received()
            .await
            .iter()
            .filter(|m| matches!(m, GameMessage::Init { .. }))
            .count();
        if inits == 2 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("guest did not get a second init from the returning host");
}

#[tokio::test]
async fn test_reconnect_host_with_wrong_credential_downgrades_to_client() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let host = spawn_peer(&relay, &network);
    let code = host.handle.host().await.unwrap();

    let impostor = spawn_peer(&relay, &network);
    impostor
        .credentials
        .save(&code, &HostCredential::generate())
        .unwrap();

    let mode = impostor.handle.reconnect_host(code.as_str()).await.unwrap();
    assert_eq!(mode, SessionMode::Client);
    assert_eq!(impostor.handle.snapshot().mode, SessionMode::Client);

    wait_until(&impostor, "impostor connected", |s| {
        s.status == SessionStatus::Connected
    })
    .await;
    assert_eq!(host.handle.snapshot().mode, SessionMode::Host);
}

#[tokio::test]
async fn test_reconnect_host_recreates_vanished_room() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let host = spawn_peer(&relay, &network);
    let code = host.handle.host().await.unwrap();
    host.handle.leave().await.unwrap();
    assert_eq!(host.handle.snapshot().status, SessionStatus::Offline);

    // Let the relay notice the dropped link and close the room.
    for _ in 0..200 {
        if relay.hub.room_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(relay.hub.room_count(), 0);

    let mode = host.handle.reconnect_host(code.as_str()).await.unwrap();
    assert_eq!(mode, SessionMode::Host);
    let snapshot = host.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::WaitingForPeer);
    assert_eq!(snapshot.room, Some(code));
}

#[tokio::test]
async fn test_reconnect_host_without_credential_joins_as_client() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let host = spawn_peer(&relay, &network);
    let code = host.handle.host().await.unwrap();

    let stranger = spawn_peer(&relay, &network);
    let mode = stranger.handle.reconnect_host(code.as_str()).await.unwrap();
    assert_eq!(mode, SessionMode::Client);
}

#[tokio::test]
async fn test_join_rejections() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let peer = spawn_peer(&relay, &network);

    assert!(matches!(
        peer.handle.join("12").await,
        Err(SessionError::InvalidRoomCode(_))
    ));

    match peer.handle.join("ZZ99").await {
        Err(SessionError::RoomNotFound(room)) => assert_eq!(room.as_str(), "ZZ99"),
        other => panic!("unexpected {other:?}"),
    }
    let snapshot = peer.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Offline);
    assert_eq!(snapshot.mode, SessionMode::Offline);
    assert!(snapshot.room.is_none());

    let (_host, _guest, code) = connect_pair(&relay, &network).await;
    match peer.handle.join(code.as_str()).await {
        Err(e @ SessionError::RoomFull(_)) => assert!(!e.next_step().is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_second_host_call_is_rejected() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let host = spawn_peer(&relay, &network);

    let code = host.handle.host().await.unwrap();
    match host.handle.host().await {
        Err(SessionError::AlreadyInRoom(room)) => assert_eq!(room, code),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        host.handle.join("ABCD").await,
        Err(SessionError::AlreadyInRoom(_))
    ));
}

#[tokio::test]
async fn test_send_without_channel_is_refused() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let host = spawn_peer(&relay, &network);

    assert!(matches!(
        host.handle.send(GameMessage::Ready).await,
        Err(SessionError::NotConnected)
    ));
    host.handle.host().await.unwrap();
    assert!(matches!(
        host.handle.send(GameMessage::Ready).await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_leave_releases_everything() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, code) = connect_pair(&relay, &network).await;

    guest.handle.leave().await.unwrap();
    let snapshot = guest.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Offline);
    assert!(snapshot.room.is_none());
    assert!(snapshot.local_peer.is_none());

    let snapshot = wait_until(&host, "host waiting", |s| {
        s.status == SessionStatus::WaitingForPeer
    })
    .await;
    assert_eq!(snapshot.room, Some(code));

    for _ in 0..200 {
        if network.live_transports() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("transports were not closed");
}

#[tokio::test]
async fn test_unreachable_relay_stays_offline() {
    init_tracing();
    let network = MemoryNetwork::new();
    let relay: Arc<dyn RelayConnector> = Arc::new(DeadRelay);
    let peer = spawn_peer_with(relay, &network, Arc::default());

    assert!(matches!(
        peer.handle.host().await,
        Err(SessionError::Relay(_))
    ));
    assert_eq!(peer.handle.snapshot().status, SessionStatus::Offline);
}

async fn wait_reconnectable(peer: &TestPeer, what: &str) {
    wait_until(peer, what, |s| matches!(s.status, SessionStatus::Reconnectable { .. })).await;
}

#[tokio::test]
async fn test_reconnect_after_channel_loss_reuses_live_link() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, code) = connect_pair(&relay, &network).await;
    let guest_id = guest.handle.snapshot().local_peer.unwrap();
    let host_id = host.handle.snapshot().local_peer.unwrap();

    network.close_channels();
    wait_reconnectable(&host, "host reconnectable").await;
    wait_reconnectable(&guest, "guest reconnectable").await;
    assert_eq!(relay.hub.occupants(&code).len(), 2);

    guest.handle.reconnect_client(code.as_str()).await.unwrap();
    let snapshot = wait_until(&guest, "guest back", |s| s.status == SessionStatus::Connected).await;
    assert_eq!(snapshot.local_peer, Some(guest_id));
    assert_eq!(snapshot.mode, SessionMode::Client);
    wait_until(&host, "host back", |s| s.status == SessionStatus::Connected).await;
    assert_eq!(relay.hub.occupants(&code).len(), 2);

    network.close_channels();
    wait_reconnectable(&host, "host reconnectable again").await;
    wait_reconnectable(&guest, "guest reconnectable again").await;

    let mode = host.handle.reconnect_host(code.as_str()).await.unwrap();
    assert_eq!(mode, SessionMode::Host);
    let snapshot = wait_until(&host, "host reclaimed", |s| s.status == SessionStatus::Connected).await;
    assert_eq!(snapshot.local_peer, Some(host_id));
    wait_until(&guest, "guest rejoined by host", |s| s.status == SessionStatus::Connected).await;
    assert_eq!(relay.hub.occupants(&code).len(), 2);
}

#[tokio::test]
async fn test_exhausted_restarts_stop_offering_and_allow_reconnect() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let config = SessionConfig {
        watchdog_timeout: Duration::from_millis(150),
        max_restarts: 2,
        ..test_config()
    };
    let (host, guest, code) = connect_pair_with(&relay, &network, config).await;

    network.hold();
    network.fail_ice();

    wait_reconnectable(&host, "host gave up").await;
    wait_reconnectable(&guest, "guest gave up").await;
    assert!(host.handle.snapshot().remote_peer.is_none());
    assert!(guest.handle.snapshot().remote_peer.is_none());

    let offers = network.offers_created();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(network.offers_created(), offers);
    assert_eq!(network.live_transports(), 0);

    network.release();
    guest.handle.reconnect_client(code.as_str()).await.unwrap();
    wait_until(&guest, "guest recovered", |s| s.status == SessionStatus::Connected).await;
    let snapshot = wait_until(&host, "host recovered", |s| s.status == SessionStatus::Connected).await;
    assert_eq!(snapshot.restarts, 0);
}

#[tokio::test]
async fn test_host_retries_taken_room_codes() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let colliding = CollidingRelay::new(relay.clone(), 2);
    let host = spawn_peer_with(Arc::new(colliding.clone()), &network, Arc::default());

    let code = host.handle.host().await.unwrap();
    assert_eq!(colliding.creates(), 3);
    assert_eq!(relay.hub.occupants(&code).len(), 1);
    assert!(host.credentials.load(&code).is_some());
    assert_eq!(host.handle.snapshot().status, SessionStatus::WaitingForPeer);
}

#[tokio::test]
async fn test_host_gives_up_after_max_create_attempts() {
    init_tracing();
    let network = MemoryNetwork::new();
    let colliding = CollidingRelay::new(MemoryRelay::new(), u32::MAX);
    let config = SessionConfig {
        max_create_attempts: 3,
        ..test_config()
    };
    let peer = spawn_configured(Arc::new(colliding.clone()), &network, Arc::default(), config);

    match peer.handle.host().await {
        Err(SessionError::RoomTaken { attempts }) => assert_eq!(attempts, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(colliding.creates(), 3);
    let snapshot = peer.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Offline);
    assert!(snapshot.room.is_none());
}

#[tokio::test]
async fn test_events_from_torn_down_records_are_ignored() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (host, guest, code) = connect_pair(&relay, &network).await;

    guest.handle.leave().await.unwrap();
    wait_until(&host, "host waiting", |s| s.status == SessionStatus::WaitingForPeer).await;
    guest.handle.join(code.as_str()).await.unwrap();
    wait_until(&host, "host connected", |s| s.status == SessionStatus::Connected).await;
    wait_until(&guest, "guest connected", |s| s.status == SessionStatus::Connected).await;

    let failed = TransportEvent::IceStateChanged(IceState::Failed);
    assert!(network.emit_on_retired(failed) >= 2);
    network.emit_on_retired(TransportEvent::ChannelStateChanged(ChannelState::Closed));
    tokio::time::sleep(Duration::from_millis(200)).await;

    for peer in [&host, &guest] {
        let snapshot = peer.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(snapshot.restarts, 0);
        assert_eq!(snapshot.ice, Some(IceState::Connected));
    }
    host.handle.send(GameMessage::Ready).await.unwrap();
}

#[tokio::test]
async fn test_continuous_state_waits_for_tick_while_events_go_now() {
    init_tracing();
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let config = SessionConfig {
        send_interval: Duration::from_secs(3600),
        ..test_config()
    };
    let (host, guest, _code) = connect_pair_with(&relay, &network, config).await;

    host.handle.send(state_message(1.0)).await.unwrap();
    host.handle.send(state_message(2.0)).await.unwrap();
    let track = GameMessage::Track {
        track_def: "{\"name\":\"night\"}".to_owned(),
    };
    host.handle.send(track.clone()).await.unwrap();

    assert_eq!(
        guest
            .bridge
            .wait_for_message(|m| matches!(m, GameMessage::Track { .. }))
            .await,
        Some(track)
    );
    assert!(
        !guest
            .bridge
            .received()
            .await
            .iter()
            .any(|m| matches!(m, GameMessage::State { .. }))
    );
}
