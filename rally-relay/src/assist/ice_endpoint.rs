use crate::app::AppState;
use crate::config::{RelayConfig, TurnConfig};
use axum::Json;
use axum::extract::{Query, State};
use rally_core::{IceServerConfig, IceServersResponse};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct IceQuery {
    pub peer: Option<String>,
}

pub async fn ice_handler(
    State(state): State<AppState>,
    Query(query): Query<IceQuery>,
) -> Json<IceServersResponse> {
    let peer = query.peer.unwrap_or_else(|| "anonymous".to_owned());
    debug!("ICE servers requested for {}", peer);

    Json(IceServersResponse {
        ice_servers: ice_servers_for(&state.config),
    })
}

/// STUN entries plus, if configured, one TURN entry. With a shared secret the
/// TURN username is the expiry timestamp and the password its HMAC, the
/// time-limited scheme a TURN server holding the same secret verifies.
pub fn ice_servers_for(config: &RelayConfig) -> Vec<IceServerConfig> {
    let mut servers = Vec::new();
    if !config.stun_urls.is_empty() {
        servers.push(IceServerConfig::stun(config.stun_urls.clone()));
    }
    if let Some(turn) = &config.turn {
        if let Some(entry) = turn_entry(turn) {
            servers.push(entry);
        }
    }
    servers
}

fn turn_entry(turn: &TurnConfig) -> Option<IceServerConfig> {
    let (username, credential) = match &turn.secret {
        Some(secret) => match turn::auth::generate_long_term_credentials(secret, turn.ttl) {
            Ok((username, password)) => (Some(username), Some(password)),
            Err(e) => {
                warn!("Could not mint TURN credentials, leaving TURN out: {}", e);
                return None;
            }
        },
        None => (turn.username.clone(), turn.credential.clone()),
    };

    Some(IceServerConfig {
        urls: vec![turn.url.clone()],
        username,
        credential,
    })
}
